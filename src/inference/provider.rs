//! Execution provider selection.

use crate::config::InferenceConfig;

/// Supported ONNX Runtime execution providers, in the forms the engine
/// knows how to configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderKind {
    TensorRt,
    Cuda,
    Cpu,
}

impl ProviderKind {
    /// Parses a provider name from configuration. Unknown names are
    /// ignored by [`provider_chain`].
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "tensorrt" | "trt" => Some(Self::TensorRt),
            "cuda" | "gpu" => Some(Self::Cuda),
            "cpu" => Some(Self::Cpu),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::TensorRt => "tensorrt",
            Self::Cuda => "cuda",
            Self::Cpu => "cpu",
        }
    }
}

/// Builds the ordered provider fallback chain from the app config.
///
/// Unknown names are dropped with a warning; CPU is appended if absent so
/// the chain always terminates in a provider that cannot fail to
/// initialise.
#[must_use]
pub fn provider_chain(config: &InferenceConfig) -> Vec<ProviderKind> {
    let mut chain = Vec::new();
    for name in &config.providers {
        match ProviderKind::parse(name) {
            Some(kind) if !chain.contains(&kind) => chain.push(kind),
            Some(_) => {}
            None => log::warn!("Ignoring unknown execution provider {name:?}"),
        }
    }
    if !chain.contains(&ProviderKind::Cpu) {
        chain.push(ProviderKind::Cpu);
    }
    chain
}
