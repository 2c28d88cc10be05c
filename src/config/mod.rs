//! Task and application configuration.
//!
//! The engine consumes already-parsed configuration structs; file-format
//! loading (YAML/INI) belongs to the embedding application. This module
//! defines the recognised options, their defaults, range validation with
//! stable error codes, and the SHA-1 fingerprint used to validate resume
//! checkpoints.

mod app;
mod fingerprint;
mod task;

pub use app::{AppConfig, InferenceConfig, LoggingConfig, ModelsConfig};
pub use fingerprint::config_fingerprint;
pub use task::{
    AudioPolicy, ConflictPolicy, DetectorType, ExecutionOrder, FaceAnalysisConfig,
    FaceDetectorConfig, FaceRecognizerConfig, FaceSelectorConfig, GenderFilter, IoConfig,
    MemoryStrategy, OutputConfig, PipelineStep, RaceFilter, ResourceConfig, SelectorMode,
    SelectorOrder, StepKind, StepParams, TaskConfig, TaskInfo,
};

/// The config schema version this engine understands.
pub const CONFIG_VERSION: &str = "1.0";
