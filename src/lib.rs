//! Scene-text detection datasets: annotation parsers for the common
//! benchmarks, a lazily parsed dataset index, ground-truth score maps and a
//! thin runner for the exported detection network.

mod dataset;
mod detect_net;
mod error;
pub mod parse;
mod record;
pub mod score_map;
mod util;

pub use dataset::*;
pub use detect_net::*;
pub use error::*;
pub use parse::ParseFn;
pub use record::*;
pub use score_map::{ScoreMapConfig, ScoreMaps};

pub use ort as runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "directml")]
    DirectML,
}

pub const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];
