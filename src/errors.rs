//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`VisageError`] covers all failure modes including:
//! - Configuration and validation errors
//! - Model lifecycle errors (missing file, malformed ONNX, provider setup)
//! - Inference runtime errors
//! - Media I/O errors (video open/decode/write)
//! - Scheduling errors (cancellation, checkpoint mismatch)
//!
//! Each variant maps to a stable [`ErrorCode`] which is part of the external
//! contract: runners report it in their result and processes exit with the
//! mapped numeric code.
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, VisageError>`.

use thiserror::Error;

/// Stable error codes reported to callers and mapped to process exit codes.
///
/// The numeric values are fixed by the external contract and must not be
/// renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Task completed successfully.
    Ok,
    /// `config_version` does not match the supported version.
    ConfigVersionMismatch,
    /// A required configuration field is missing or empty.
    RequiredFieldMissing,
    /// A configured path does not exist or is not usable.
    InvalidPath,
    /// A configuration parameter is outside its valid range.
    ParameterOutOfRange,
    /// Model file not found on disk.
    ModelNotFound,
    /// Model file exists but could not be loaded (malformed ONNX).
    ModelLoadFailed,
    /// Every configured execution provider failed to initialise.
    ProviderInitFailed,
    /// Inference run failed or produced an unusable output.
    InferenceFailed,
    /// Video could not be opened for reading.
    VideoOpenFailed,
    /// Video frame decoding failed.
    VideoDecodeFailed,
    /// Output file could not be opened or written.
    OutputWriteFailed,
    /// Task was cancelled cooperatively.
    TaskCancelled,
    /// Stored checkpoint does not match the current configuration.
    CheckpointMismatch,
}

impl ErrorCode {
    /// Numeric process exit code for this error.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::ConfigVersionMismatch => 204,
            Self::RequiredFieldMissing => 205,
            Self::InvalidPath | Self::ParameterOutOfRange => 206,
            Self::ModelNotFound | Self::ModelLoadFailed | Self::ProviderInitFailed => 301,
            Self::InferenceFailed => 401,
            Self::VideoOpenFailed | Self::VideoDecodeFailed => 402,
            Self::OutputWriteFailed => 406,
            Self::TaskCancelled | Self::CheckpointMismatch => 407,
        }
    }

    /// Short tag used in log lines, e.g. `E402`.
    #[must_use]
    pub fn tag(self) -> String {
        format!("E{}", self.exit_code())
    }
}

/// The main error type for the Visage engine.
///
/// Per-frame failures inside the pipeline are logged and absorbed (the frame
/// passes through unchanged); the variants here are the ones that surface
/// from runner and registry entry points.
#[derive(Error, Debug)]
pub enum VisageError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// The task config declares an unsupported `config_version`.
    #[error("Unsupported config version: {found} (expected {expected})")]
    ConfigVersionMismatch {
        /// Version string found in the config
        found: String,
        /// Version string the engine supports
        expected: String,
    },

    /// A required configuration field is missing or empty.
    #[error("Missing required config field: {0}")]
    RequiredFieldMissing(String),

    /// A configured path is missing or unusable.
    #[error("Invalid path for {field}: {path}")]
    InvalidPath {
        /// Config field the path came from
        field: String,
        /// The offending path
        path: String,
    },

    /// A parameter is outside its documented range.
    #[error("Parameter out of range: {field} = {value}")]
    ParameterOutOfRange {
        /// Config field name
        field: String,
        /// Stringified offending value
        value: String,
    },

    // ========================================================================
    // Model Lifecycle Errors
    // ========================================================================
    /// The requested model file does not exist.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// The model file could not be loaded.
    #[error("Model load failed for {path}: {reason}")]
    ModelLoadFailed {
        /// Path of the model file
        path: String,
        /// Loader error message
        reason: String,
    },

    /// Every execution provider in the preference chain failed.
    #[error("All execution providers failed to initialise: {0}")]
    ProviderInitFailed(String),

    // ========================================================================
    // Inference Runtime Errors
    // ========================================================================
    /// An inference run failed.
    #[error("Inference failed in {context}: {reason}")]
    InferenceFailed {
        /// Which model/stage was running
        context: String,
        /// Runtime error message
        reason: String,
    },

    /// A model output had an unexpected shape.
    #[error("Tensor shape mismatch in {context}: expected {expected}, got {actual}")]
    TensorShapeMismatch {
        /// Which model/stage was running
        context: String,
        /// Expected shape description
        expected: String,
        /// Actual shape description
        actual: String,
    },

    // ========================================================================
    // Media I/O Errors
    // ========================================================================
    /// Video could not be opened.
    #[error("Failed to open video: {0}")]
    VideoOpenFailed(String),

    /// A frame could not be decoded.
    #[error("Video decode error: {0}")]
    VideoDecodeFailed(String),

    /// Output could not be opened or written.
    #[error("Output write failed: {0}")]
    OutputWriteFailed(String),

    /// Image decoding error.
    #[error("Image decode error: {0}")]
    ImageDecodeError(String),

    /// File I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing error (manifests, checkpoints, probe output).
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    // ========================================================================
    // Scheduling Errors
    // ========================================================================
    /// The task was cancelled.
    #[error("Task cancelled")]
    Cancelled,

    /// A checkpoint exists but belongs to a different configuration.
    #[error("Checkpoint config hash mismatch for task {0}")]
    CheckpointMismatch(String),
}

impl VisageError {
    /// The stable [`ErrorCode`] for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConfigVersionMismatch { .. } => ErrorCode::ConfigVersionMismatch,
            Self::RequiredFieldMissing(_) => ErrorCode::RequiredFieldMissing,
            Self::InvalidPath { .. } => ErrorCode::InvalidPath,
            Self::ParameterOutOfRange { .. } => ErrorCode::ParameterOutOfRange,
            Self::ModelNotFound(_) => ErrorCode::ModelNotFound,
            Self::ModelLoadFailed { .. } => ErrorCode::ModelLoadFailed,
            Self::ProviderInitFailed(_) => ErrorCode::ProviderInitFailed,
            Self::InferenceFailed { .. } | Self::TensorShapeMismatch { .. } => {
                ErrorCode::InferenceFailed
            }
            Self::VideoOpenFailed(_) => ErrorCode::VideoOpenFailed,
            Self::VideoDecodeFailed(_) | Self::ImageDecodeError(_) => ErrorCode::VideoDecodeFailed,
            Self::OutputWriteFailed(_) | Self::IoError(_) | Self::JsonError(_) => {
                ErrorCode::OutputWriteFailed
            }
            Self::Cancelled => ErrorCode::TaskCancelled,
            Self::CheckpointMismatch(_) => ErrorCode::CheckpointMismatch,
        }
    }
}

impl From<image::ImageError> for VisageError {
    fn from(err: image::ImageError) -> Self {
        VisageError::ImageDecodeError(err.to_string())
    }
}

impl From<ort::Error> for VisageError {
    fn from(err: ort::Error) -> Self {
        VisageError::InferenceFailed {
            context: "ort".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Alias for `Result<T, VisageError>`.
pub type Result<T> = std::result::Result<T, VisageError>;
