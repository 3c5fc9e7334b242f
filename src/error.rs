use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    /// A directory the dataset layout requires does not exist.
    #[error("\"{}\" is not available", path.display())]
    MissingResource { path: PathBuf },

    /// An annotation file violates its format's grammar. `line` is 1-based,
    /// 0 when the problem is not tied to a single line.
    #[error("malformed annotation {}:{line}: {reason} (line: {content:?})", path.display())]
    MalformedAnnotation {
        path: PathBuf,
        line: usize,
        content: String,
        reason: String,
    },

    #[error("Invalid dataset, got \"{name}\", but expected to be one of {valid:?}")]
    UnknownDataset {
        name: String,
        valid: Vec<&'static str>,
    },

    #[error("Invalid backbone, got \"{name}\", but expected to be one of {valid:?}")]
    UnknownBackbone {
        name: String,
        valid: Vec<&'static str>,
    },

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image error at {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("invalid tensor: {message}")]
    InvalidTensor { message: String },

    #[error(transparent)]
    Inference(#[from] ort::Error),
}

impl DatasetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
