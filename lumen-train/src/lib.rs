//! Lumen Training Crate
//!
//! The training-side data pipeline for forward-facing radiance-field scenes.
//! It turns a loaded LLFF subject into per-step ray batches and evaluates
//! the per-element training losses.
//!
//! ## Modules
//!
//! - [`config`]: Subject configuration, readable from JSON
//! - [`rays`]: Camera ray generation and NDC projection
//! - [`sampling`]: Uniform and importance pixel samplers
//! - [`subject`]: The per-subject loader producing [`TrainingBatch`]es
//! - [`loss`]: Photometric and regularization loss terms

pub mod config;
pub mod error;
pub mod loss;
pub mod pixels;
pub mod rays;
pub mod sampling;
pub mod subject;

pub use config::{BackgroundMode, SamplingType, SubjectConfig, SubjectId};
pub use error::{TrainError, TrainResult};
pub use loss::{DistortionInputs, DistortionKernel, LossAggregator, LossTerm, LossTerms, RaySegment};
pub use rays::{CameraConvention, CameraRays, NdcProjector, RayBatch};
pub use sampling::{
    ImportanceSampler, ImportanceSignal, LangevinProposal, PixelProposal, PixelSampler, UniformSampler,
};
pub use subject::{SubjectLoader, TrainingBatch};
