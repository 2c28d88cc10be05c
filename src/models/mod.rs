//! Model Repository
//!
//! Resolves logical model names to files on disk. The store layout is
//! described by a small JSON manifest (`manifest.json`) in the model root
//! mapping names to relative paths:
//!
//! ```json
//! {
//!     "inswapper_128_fp16": { "path": "swapper/inswapper_128_fp16.onnx" },
//!     "inswapper_128_fp16_matrix": { "path": "swapper/inswapper_128_fp16.matrix" },
//!     "gfpgan_1.4": { "path": "enhancer/gfpgan_1.4.onnx" }
//! }
//! ```
//!
//! When no manifest is present, names resolve to `<root>/<name>.onnx` as a
//! flat-directory fallback. Downloading and integrity checking of model
//! files belong to the embedding application.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{Result, VisageError};

/// Well-known logical model names used by the built-in processors.
pub mod names {
    pub const INSWAPPER_128: &str = "inswapper_128";
    pub const INSWAPPER_128_FP16: &str = "inswapper_128_fp16";
    pub const GFPGAN_14: &str = "gfpgan_1.4";
    pub const CODEFORMER: &str = "codeformer";
    pub const FEATURE_EXTRACTOR: &str = "live_portrait_feature_extractor";
    pub const MOTION_EXTRACTOR: &str = "live_portrait_motion_extractor";
    pub const GENERATOR: &str = "live_portrait_generator";
    pub const DETECTOR_YOLO: &str = "yoloface_8n";
    pub const DETECTOR_SCRFD: &str = "scrfd_2.5g";
    pub const DETECTOR_RETINA: &str = "retinaface_10g";
    pub const LANDMARKER_2DFAN: &str = "2dfan4";
    pub const LANDMARKER_68_BY_5: &str = "face_landmarker_68_by_5";
    pub const RECOGNIZER_ARCFACE: &str = "arcface_w600k_r50";
    pub const CLASSIFIER_FAIRFACE: &str = "fairface";
    pub const FACE_OCCLUDER: &str = "face_occluder";
    pub const FACE_PARSER: &str = "face_parser";
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    path: String,
}

/// Path resolution for named models under a configured root directory.
#[derive(Debug)]
pub struct ModelRepository {
    root: PathBuf,
    manifest: HashMap<String, ManifestEntry>,
}

impl ModelRepository {
    /// Opens the repository at `root`, reading `manifest.json` if present.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let manifest_path = root.join("manifest.json");
        let manifest = if manifest_path.is_file() {
            let text = fs::read_to_string(&manifest_path)?;
            serde_json::from_str(&text)?
        } else {
            HashMap::new()
        };
        Ok(Self { root, manifest })
    }

    /// The repository root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a logical model name to an absolute path.
    ///
    /// Fails with `ModelNotFound` when the resolved file does not exist.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = self
            .manifest
            .get(name)
            .map_or_else(|| format!("{name}.onnx"), |entry| entry.path.clone());
        let path = self.root.join(relative);
        if !path.is_file() {
            return Err(VisageError::ModelNotFound(path.display().to_string()));
        }
        let absolute = path.canonicalize().unwrap_or(path);
        Ok(absolute)
    }

    /// Resolves the raw initializer-matrix sidecar for a swapper model.
    ///
    /// The 512x512 projection matrix lives next to the model file with a
    /// `.matrix` suffix (`<model name>_matrix` in the manifest).
    pub fn resolve_matrix(&self, model_name: &str) -> Result<PathBuf> {
        let sidecar = format!("{model_name}_matrix");
        if self.manifest.contains_key(&sidecar) {
            return self.resolve(&sidecar);
        }
        let model_path = self.resolve(model_name)?;
        let path = model_path.with_extension("matrix");
        if !path.is_file() {
            return Err(VisageError::ModelNotFound(path.display().to_string()));
        }
        Ok(path)
    }
}
