//! Application-level configuration shared across tasks.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub models: ModelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// GPU device ordinal for CUDA/TensorRT providers.
    #[serde(default)]
    pub device_id: i32,
    /// Ordered provider preference, e.g. `["tensorrt", "cuda", "cpu"]`.
    /// CPU is appended as the terminal fallback if absent.
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,
    /// TensorRT workspace cap in bytes; 0 uses the runtime default.
    #[serde(default)]
    pub workspace_limit_bytes: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            providers: default_providers(),
            workspace_limit_bytes: 0,
        }
    }
}

fn default_providers() -> Vec<String> {
    vec!["cuda".to_string(), "cpu".to_string()]
}

/// Log sink settings are consumed by the embedding application; the engine
/// itself only emits through the `log` facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            rotation: String::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Root directory of the model store.
    #[serde(default = "default_models_path")]
    pub path: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            path: default_models_path(),
        }
    }
}

fn default_models_path() -> String {
    "./models".to_string()
}
