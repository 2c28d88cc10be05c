//! A loaded ONNX model with thread-safe run access.

use std::path::{Path, PathBuf};

use ndarray::ArrayD;
use ort::execution_providers::{
    CUDAExecutionProvider, ExecutionProvider, TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Value, ValueType};
use parking_lot::Mutex;

use crate::errors::{Result, VisageError};

use super::provider::ProviderKind;

/// Options that shape session construction; part of the registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionOptions {
    /// Ordered provider fallback chain (always ends in CPU).
    pub providers: Vec<ProviderKind>,
    /// GPU device ordinal.
    pub device_id: i32,
    /// TensorRT workspace cap in bytes; 0 for runtime default.
    pub workspace_limit_bytes: u64,
    /// Whether the model weights are FP16.
    pub fp16: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            providers: vec![ProviderKind::Cpu],
            device_id: 0,
            workspace_limit_bytes: 0,
            fp16: false,
        }
    }
}

/// Canonical pool key: absolute model path plus the construction options.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub model_path: PathBuf,
    pub options: SessionOptions,
}

impl SessionKey {
    /// Builds a key with the path canonicalised so distinct spellings of the
    /// same file share a session.
    #[must_use]
    pub fn new(model_path: impl AsRef<Path>, options: SessionOptions) -> Self {
        let path = model_path.as_ref();
        let model_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        Self {
            model_path,
            options,
        }
    }
}

/// One extracted output tensor: name, shape and row-major data.
#[derive(Debug, Clone)]
pub struct TensorOutput {
    pub name: String,
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

impl TensorOutput {
    /// The tensor as a dynamic-dimension ndarray view.
    pub fn to_array(&self) -> Result<ArrayD<f32>> {
        let shape: Vec<usize> = self.shape.iter().map(|&d| d.max(0) as usize).collect();
        ArrayD::from_shape_vec(shape, self.data.clone()).map_err(|e| {
            VisageError::TensorShapeMismatch {
                context: self.name.clone(),
                expected: format!("{:?}", self.shape),
                actual: e.to_string(),
            }
        })
    }
}

/// A loaded model. `run` is serialised through an internal mutex, so a
/// session may be shared freely between pipeline workers.
pub struct InferenceSession {
    session: Mutex<Session>,
    model_path: PathBuf,
    input_names: Vec<String>,
    output_names: Vec<String>,
    input_dims: Vec<Vec<i64>>,
}

impl InferenceSession {
    /// Loads the model, walking the provider chain until one initialises.
    ///
    /// A missing file fails with `ModelNotFound`; a file no provider can
    /// load fails with `ModelLoadFailed`; provider setup errors are logged
    /// and the next provider in the chain is attempted.
    pub fn load(key: &SessionKey) -> Result<Self> {
        if !key.model_path.is_file() {
            return Err(VisageError::ModelNotFound(
                key.model_path.display().to_string(),
            ));
        }

        let mut last_error: Option<String> = None;
        for provider in &key.options.providers {
            match Self::build_with_provider(&key.model_path, &key.options, *provider) {
                Ok(session) => {
                    log::info!(
                        "Loaded {} on {}",
                        key.model_path.display(),
                        provider.name()
                    );
                    return Self::describe(session, &key.model_path);
                }
                Err(reason) => {
                    log::warn!(
                        "Provider {} failed for {}: {reason}",
                        provider.name(),
                        key.model_path.display()
                    );
                    last_error = Some(reason);
                }
            }
        }

        // The chain always ends in CPU, so reaching this point means the
        // model itself is unloadable.
        Err(VisageError::ModelLoadFailed {
            path: key.model_path.display().to_string(),
            reason: last_error.unwrap_or_else(|| "no execution provider available".into()),
        })
    }

    fn build_with_provider(
        model_path: &Path,
        options: &SessionOptions,
        provider: ProviderKind,
    ) -> std::result::Result<Session, String> {
        let mut builder = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .map_err(|e| e.to_string())?;

        match provider {
            ProviderKind::TensorRt => {
                let mut trt = TensorRTExecutionProvider::default()
                    .with_device_id(options.device_id);
                if options.workspace_limit_bytes > 0 {
                    trt = trt.with_max_workspace_size(options.workspace_limit_bytes as usize);
                }
                if !trt.is_available().unwrap_or(false) {
                    return Err("TensorRT provider unavailable".to_string());
                }
                builder = builder
                    .with_execution_providers([trt.build()])
                    .map_err(|e| e.to_string())?;
            }
            ProviderKind::Cuda => {
                let cuda = CUDAExecutionProvider::default().with_device_id(options.device_id);
                if !cuda.is_available().unwrap_or(false) {
                    return Err("CUDA provider unavailable".to_string());
                }
                builder = builder
                    .with_execution_providers([cuda.build()])
                    .map_err(|e| e.to_string())?;
            }
            ProviderKind::Cpu => {}
        }

        builder.commit_from_file(model_path).map_err(|e| e.to_string())
    }

    fn describe(session: Session, model_path: &Path) -> Result<Self> {
        let mut input_names = Vec::new();
        let mut input_dims = Vec::new();
        for input in session.inputs() {
            input_names.push(input.name().to_string());
            if let ValueType::Tensor { shape, .. } = input.dtype() {
                input_dims.push(shape.iter().copied().collect());
            } else {
                input_dims.push(Vec::new());
            }
        }
        let output_names = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        Ok(Self {
            session: Mutex::new(session),
            model_path: model_path.to_path_buf(),
            input_names,
            output_names,
            input_dims,
        })
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    #[must_use]
    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    #[must_use]
    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    /// Declared input dimensions per input (may contain -1 for dynamic
    /// axes).
    #[must_use]
    pub fn input_dims(&self) -> &[Vec<i64>] {
        &self.input_dims
    }

    /// Declared `(height, width)` of input `index`, for models with static
    /// NCHW inputs.
    #[must_use]
    pub fn input_hw(&self, index: usize) -> Option<(usize, usize)> {
        let dims = self.input_dims.get(index)?;
        if dims.len() == 4 && dims[2] > 0 && dims[3] > 0 {
            Some((dims[2] as usize, dims[3] as usize))
        } else {
            None
        }
    }

    /// Declared `(height, width)` of the named input, for models with
    /// static NCHW inputs.
    #[must_use]
    pub fn input_hw_for(&self, name: &str) -> Option<(usize, usize)> {
        let index = self.input_names.iter().position(|n| n == name)?;
        self.input_hw(index)
    }

    /// Runs the model on named float tensors and extracts every output.
    pub fn run(&self, inputs: Vec<(&str, ArrayD<f32>)>) -> Result<Vec<TensorOutput>> {
        let context = self
            .model_path
            .file_name()
            .map_or_else(|| self.model_path.display().to_string(), |n| {
                n.to_string_lossy().into_owned()
            });

        let mut values: Vec<(&str, Value)> = Vec::with_capacity(inputs.len());
        for (name, array) in inputs {
            let value = Value::from_array(array).map_err(|e| VisageError::InferenceFailed {
                context: context.clone(),
                reason: e.to_string(),
            })?;
            values.push((name, value.into()));
        }

        let mut session = self.session.lock();
        let outputs = session
            .run(values)
            .map_err(|e| VisageError::InferenceFailed {
                context: context.clone(),
                reason: e.to_string(),
            })?;

        let mut extracted = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let (shape, data) = outputs[name.as_str()]
                .try_extract_tensor::<f32>()
                .map_err(|e| VisageError::InferenceFailed {
                    context: context.clone(),
                    reason: format!("output {name}: {e}"),
                })?;
            if data.is_empty() {
                return Err(VisageError::InferenceFailed {
                    context,
                    reason: format!("output {name} is empty"),
                });
            }
            extracted.push(TensorOutput {
                name: name.clone(),
                shape: shape.iter().copied().collect(),
                data: data.to_vec(),
            });
        }
        Ok(extracted)
    }
}

impl std::fmt::Debug for InferenceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceSession")
            .field("model_path", &self.model_path)
            .field("inputs", &self.input_names)
            .field("outputs", &self.output_names)
            .finish_non_exhaustive()
    }
}
