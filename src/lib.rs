#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod config;
pub mod errors;
pub mod face;
pub mod inference;
pub mod masks;
pub mod media;
pub mod models;
pub mod pipeline;
pub mod processors;
pub mod runner;
pub mod vision;

pub use config::{AppConfig, TaskConfig};
pub use errors::{ErrorCode, Result, VisageError};
pub use face::{Face, FaceAnalyser, FaceAnalysis, FaceSelectorOptions, FaceStore};
pub use inference::{SessionHandle, SessionKey, SessionRegistry};
pub use masks::{MaskComposer, MaskRequest};
pub use models::ModelRepository;
pub use pipeline::{FrameData, Pipeline, PipelineConfig};
pub use processors::FrameProcessor;
pub use runner::{CheckpointManager, CheckpointRecord, ImageRunner, TaskOutcome, TaskRunner, VideoRunner};
pub use vision::Frame;
