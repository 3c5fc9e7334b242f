//! The score-map network as an external collaborator.
//!
//! The upsampling head is only described here ([`Backbone::upsample_head`]);
//! the layers themselves live in an exported ONNX model that [`DetectNet`]
//! runs.

use std::{fmt, path::PathBuf, str::FromStr};

use ndarray::{Array4, Ix4};
use ort::{inputs, ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{DatasetError, ExecutionProvider, Result};

/// Five stride-2 stages between the input and the deepest feature map.
const SIZE_DIVISOR: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backbone {
    Vgg16,
    Resnet34,
    Resnet50,
    Resnet101,
    Resnet152,
    SeResnext50_32x4d,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// A single 4x4 stride-2 transposed convolution.
    Deconv,
    /// 1x1 conv, `kernel` x `kernel` conv, then a 2x transposed conv, with
    /// ReLU and dropout between them. Merge stages first concatenate the
    /// upsampled map with the backbone's shortcut.
    Fuse { kernel: usize },
    /// 3x3 conv followed by a 1x1 conv to the output channels.
    Predict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadStage {
    pub name: &'static str,
    pub kind: StageKind,
    pub in_channels: usize,
    pub out_channels: usize,
}

impl Backbone {
    pub const ALL: [Backbone; 6] = [
        Backbone::Vgg16,
        Backbone::Resnet34,
        Backbone::Resnet50,
        Backbone::Resnet101,
        Backbone::Resnet152,
        Backbone::SeResnext50_32x4d,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Backbone::Vgg16 => "vgg16",
            Backbone::Resnet34 => "resnet34",
            Backbone::Resnet50 => "resnet50",
            Backbone::Resnet101 => "resnet101",
            Backbone::Resnet152 => "resnet152",
            Backbone::SeResnext50_32x4d => "se_resnext50_32x4d",
        }
    }

    /// Channel multiplier of the residual blocks.
    pub fn expansion(self) -> usize {
        match self {
            Backbone::Vgg16 | Backbone::Resnet34 => 1,
            _ => 4,
        }
    }

    /// Channels of the feature maps C1..C5.
    pub fn feature_channels(self) -> [usize; 5] {
        match self {
            Backbone::Vgg16 => [64, 128, 256, 512, 512],
            _ => {
                let e = self.expansion();
                [64, 64 * e, 128 * e, 256 * e, 512 * e]
            }
        }
    }

    pub fn upsample_head(self, output_channels: usize) -> Vec<HeadStage> {
        let [c1, c2, c3, c4, c5] = self.feature_channels();
        let stage = |name, kind, in_channels, out_channels| HeadStage {
            name,
            kind,
            in_channels,
            out_channels,
        };
        match self {
            Backbone::Vgg16 => vec![
                stage("deconv5", StageKind::Deconv, c5, c5),
                stage("merge4", StageKind::Fuse { kernel: 3 }, c5 + c4, c4 / 2),
                stage("merge3", StageKind::Fuse { kernel: 3 }, c4 / 2 + c3, c3 / 2),
                stage("merge2", StageKind::Fuse { kernel: 3 }, c3 / 2 + c2, c2 / 2),
                stage(
                    "merge1",
                    StageKind::Fuse { kernel: 3 },
                    c2 / 2 + c1,
                    output_channels,
                ),
            ],
            _ => vec![
                stage("deconv5", StageKind::Fuse { kernel: 3 }, c5, c5 / 2),
                stage("merge4", StageKind::Fuse { kernel: 3 }, c5 / 2 + c4, c4 / 2),
                stage("merge3", StageKind::Fuse { kernel: 3 }, c4 / 2 + c3, c3 / 2),
                stage("merge2", StageKind::Fuse { kernel: 5 }, c3 / 2 + c2, c2 / 2),
                stage("merge1", StageKind::Fuse { kernel: 5 }, c2 / 2 + c1, 64),
                stage("predict", StageKind::Predict, 64, output_channels),
            ],
        }
    }
}

impl fmt::Display for Backbone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backbone {
    type Err = DatasetError;

    fn from_str(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|backbone| backbone.name() == name)
            .ok_or_else(|| DatasetError::UnknownBackbone {
                name: name.to_owned(),
                valid: Self::ALL.iter().map(|it| it.name()).collect(),
            })
    }
}

#[cfg(feature = "cuda")]
fn setup_cuda() -> ExecutionProviderDispatch {
    use ort::CUDAExecutionProvider;

    CUDAExecutionProvider::default().build()
}

#[cfg(feature = "coreml")]
fn setup_coreml() -> ExecutionProviderDispatch {
    use ort::CoreMLExecutionProvider;

    CoreMLExecutionProvider::default().build()
}

#[cfg(feature = "directml")]
fn setup_directml() -> ExecutionProviderDispatch {
    use ort::DirectMLExecutionProvider;

    DirectMLExecutionProvider::default().build()
}

pub struct DetectNet {
    session: Session,
    input_name: String,
    backbone: Backbone,
    output_channels: usize,
}

impl DetectNet {
    #[instrument(level = "debug")]
    pub fn init(
        path: PathBuf,
        backbone: Backbone,
        output_channels: usize,
        num_threads: usize,
        execution_providers: &[ExecutionProvider],
    ) -> Result<Self> {
        #[cfg(feature = "directml")]
        let parallel = !execution_providers.contains(&ExecutionProvider::DirectML);
        #[cfg(not(feature = "directml"))]
        let parallel = true;

        let execution_providers = execution_providers.iter().filter_map(
            |provider| -> Option<ExecutionProviderDispatch> {
                match provider {
                    ExecutionProvider::Default => None,
                    #[cfg(feature = "cuda")]
                    ExecutionProvider::Cuda => Some(setup_cuda()),
                    #[cfg(feature = "coreml")]
                    ExecutionProvider::CoreML => Some(setup_coreml()),
                    #[cfg(feature = "directml")]
                    ExecutionProvider::DirectML => Some(setup_directml()),
                }
            },
        );

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_memory_pattern(parallel)?
            .with_parallel_execution(parallel)?
            .with_inter_threads(num_threads)?
            .with_intra_threads(num_threads)?
            .with_execution_providers(execution_providers)?
            .commit_from_file(path)?;

        log::debug!("DetectNet inputs: {:?}", session.inputs);
        log::debug!("DetectNet outputs: {:?}", session.outputs);

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| DatasetError::InvalidTensor {
                message: "model declares no inputs".to_owned(),
            })?;

        Ok(Self {
            session,
            input_name,
            backbone,
            output_channels,
        })
    }

    pub fn backbone(&self) -> Backbone {
        self.backbone
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    /// Runs a `(n, 3, h, w)` batch and returns the `(n, output_channels, h', w')`
    /// score maps.
    #[instrument(level = "debug", skip(self, batch), fields(backbone = %self.backbone))]
    pub fn predict(&self, batch: Array4<f32>) -> Result<Array4<f32>> {
        check_input(batch.dim())?;
        let (samples, ..) = batch.dim();

        let outputs = self
            .session
            .run(inputs![self.input_name.as_str() => batch]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| DatasetError::InvalidTensor {
                message: "model produced no outputs".to_owned(),
            })?;
        let scores = output.try_extract_tensor::<f32>()?;
        log::trace!("Output tensor size: {:?}", scores.shape());
        check_output(scores.shape(), samples, self.output_channels)?;

        let scores = scores
            .to_owned()
            .into_dimensionality::<Ix4>()
            .map_err(|err| DatasetError::InvalidTensor {
                message: format!("expected a 4D output: {err}"),
            })?;
        Ok(scores)
    }
}

impl fmt::Debug for DetectNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectNet")
            .field("input_name", &self.input_name)
            .field("backbone", &self.backbone)
            .field("output_channels", &self.output_channels)
            .finish_non_exhaustive()
    }
}

fn check_input((samples, channels, height, width): (usize, usize, usize, usize)) -> Result<()> {
    if samples == 0 || channels != 3 {
        return Err(DatasetError::InvalidTensor {
            message: format!("expected a non-empty (n, 3, h, w) batch, got {channels} channels and {samples} samples"),
        });
    }
    if height == 0 || width == 0 || height % SIZE_DIVISOR != 0 || width % SIZE_DIVISOR != 0 {
        return Err(DatasetError::InvalidTensor {
            message: format!(
                "height and width must be positive multiples of {SIZE_DIVISOR}, got {height}x{width}"
            ),
        });
    }
    Ok(())
}

/// `shape` must be `(samples, output_channels, h, w)`.
fn check_output(shape: &[usize], samples: usize, output_channels: usize) -> Result<()> {
    let &[out_samples, channels, _, _] = shape else {
        return Err(DatasetError::InvalidTensor {
            message: format!("expected a 4D output, got shape {shape:?}"),
        });
    };
    if out_samples != samples || channels != output_channels {
        return Err(DatasetError::InvalidTensor {
            message: format!(
                "expected {samples} samples with {output_channels} channels, got {out_samples} with {channels}"
            ),
        });
    }
    Ok(())
}
