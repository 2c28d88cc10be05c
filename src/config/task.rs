//! Task configuration: the per-run description of what to process and how.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, VisageError};

use super::CONFIG_VERSION;

// ============================================================================
// Top level
// ============================================================================

/// A complete task description, typically merged from a config file and CLI
/// overrides by the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Schema version; must equal [`CONFIG_VERSION`].
    pub config_version: String,
    pub task_info: TaskInfo,
    pub io: IoConfig,
    #[serde(default)]
    pub face_analysis: FaceAnalysisConfig,
    #[serde(default)]
    pub resource: ResourceConfig,
    /// Ordered stage list; disabled steps are kept for fingerprint stability
    /// but not instantiated.
    pub pipeline: Vec<PipelineStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Task identifier, `[A-Za-z0-9_]+`; names the checkpoint file.
    pub id: String,
    /// Enables checkpoint persistence and recovery for video targets.
    #[serde(default)]
    pub enable_resume: bool,
}

// ============================================================================
// I/O
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    /// Source face images; at least one required.
    pub source_paths: Vec<String>,
    /// Target images or videos; at least one required.
    pub target_paths: Vec<String>,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory.
    pub path: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    /// One of `png`, `jpg`, `jpeg`, `bmp`.
    #[serde(default = "default_image_format")]
    pub image_format: String,
    /// Encoder quality for lossy image formats, 0..=100.
    #[serde(default = "default_image_quality")]
    pub image_quality: u32,
    #[serde(default = "default_video_encoder")]
    pub video_encoder: String,
    /// Encoder-specific quality, 0..=100.
    #[serde(default = "default_video_quality")]
    pub video_quality: u32,
    #[serde(default)]
    pub audio_policy: AudioPolicy,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

fn default_image_format() -> String {
    "png".to_string()
}

fn default_image_quality() -> u32 {
    100
}

fn default_video_encoder() -> String {
    "libx264".to_string()
}

fn default_video_quality() -> u32 {
    80
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioPolicy {
    /// Remux the original audio tracks into the output.
    #[default]
    Copy,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    Overwrite,
    Skip,
    /// Append `-1`, `-2`, … before the extension until the name is free.
    Rename,
}

// ============================================================================
// Face analysis
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaceAnalysisConfig {
    #[serde(default)]
    pub face_detector: FaceDetectorConfig,
    #[serde(default)]
    pub face_recognizer: FaceRecognizerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDetectorConfig {
    #[serde(rename = "type", default)]
    pub detector_type: DetectorType,
    /// Minimum detection confidence, 0..1.
    #[serde(default = "default_detector_score")]
    pub score_threshold: f32,
    /// NMS IoU threshold, 0..1.
    #[serde(default = "default_detector_iou")]
    pub iou_threshold: f32,
    /// Square detector input size in pixels.
    #[serde(default = "default_detector_size")]
    pub size: u32,
}

impl Default for FaceDetectorConfig {
    fn default() -> Self {
        Self {
            detector_type: DetectorType::default(),
            score_threshold: default_detector_score(),
            iou_threshold: default_detector_iou(),
            size: default_detector_size(),
        }
    }
}

fn default_detector_score() -> f32 {
    0.5
}

fn default_detector_iou() -> f32 {
    0.4
}

fn default_detector_size() -> u32 {
    640
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorType {
    #[default]
    Yolo,
    Scrfd,
    RetinaFace,
    /// Fuse the results of all detectors with a tight IoU threshold.
    Many,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRecognizerConfig {
    /// Reference-mode cosine distance cutoff, 0..1.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

impl Default for FaceRecognizerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.6
}

// ============================================================================
// Face selection
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceSelectorConfig {
    #[serde(default)]
    pub mode: SelectorMode,
    #[serde(default)]
    pub order: SelectorOrder,
    /// Inclusive age range filter, 0..=100.
    #[serde(default = "default_age_range")]
    pub age_range: (u32, u32),
    #[serde(default)]
    pub gender: GenderFilter,
    #[serde(default)]
    pub race: RaceFilter,
    /// In `One` mode, which face (by selector order) to keep.
    #[serde(default)]
    pub position: u32,
    /// Reference image for `Reference` mode.
    #[serde(default)]
    pub reference_image_path: Option<String>,
}

impl Default for FaceSelectorConfig {
    fn default() -> Self {
        Self {
            mode: SelectorMode::default(),
            order: SelectorOrder::default(),
            age_range: default_age_range(),
            gender: GenderFilter::default(),
            race: RaceFilter::default(),
            position: 0,
            reference_image_path: None,
        }
    }
}

fn default_age_range() -> (u32, u32) {
    (0, 100)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorMode {
    One,
    #[default]
    Many,
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorOrder {
    #[default]
    LeftRight,
    RightLeft,
    TopBottom,
    BottomTop,
    SmallLarge,
    LargeSmall,
    BestWorst,
    WorstBest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenderFilter {
    Male,
    Female,
    #[default]
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceFilter {
    White,
    Black,
    Asian,
    Latino,
    Arabic,
    Indian,
    #[default]
    All,
}

// ============================================================================
// Resources
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub memory_strategy: MemoryStrategy,
    /// Pipeline worker threads, >= 1. 0 selects the hardware parallelism.
    #[serde(default)]
    pub worker_thread_count: u32,
    /// Input and output queue capacity, >= 1.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: u32,
    /// Cap on concurrent GPU-bound stage executions, >= 1.
    #[serde(default = "default_max_gpu_tasks")]
    pub max_concurrent_gpu_tasks: u32,
    /// Optional frame cap per target; 0 means unbounded.
    #[serde(default)]
    pub max_frames: u64,
    #[serde(default)]
    pub execution_order: ExecutionOrder,
}

impl ResourceConfig {
    /// Worker count with the `0 = auto` rule applied.
    #[must_use]
    pub fn effective_thread_count(&self) -> usize {
        if self.worker_thread_count == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            self.worker_thread_count as usize
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory_strategy: MemoryStrategy::default(),
            worker_thread_count: 0,
            max_queue_size: default_max_queue_size(),
            max_concurrent_gpu_tasks: default_max_gpu_tasks(),
            max_frames: 0,
            execution_order: ExecutionOrder::default(),
        }
    }
}

fn default_max_queue_size() -> u32 {
    16
}

fn default_max_gpu_tasks() -> u32 {
    2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStrategy {
    /// Stage-at-a-time processing with on-disk staging and a clamped queue.
    Strict,
    #[default]
    Tolerant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOrder {
    #[default]
    Sequential,
    Batch,
}

// ============================================================================
// Pipeline steps
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    pub step: StepKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub params: StepParams,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    FaceSwapper,
    FaceEnhancer,
    ExpressionRestorer,
    FrameEnhancer,
}

/// Per-step parameters, tagged by step kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepParams {
    FaceSwapper {
        /// Logical model name, e.g. `inswapper_128_fp16`.
        model: String,
        #[serde(default)]
        face_selector: FaceSelectorConfig,
        /// Box mask padding in percent of crop size: top, right, bottom, left.
        #[serde(default)]
        mask_padding: [i32; 4],
        /// Box mask feather amount, 0..1.
        #[serde(default = "default_mask_blur")]
        mask_blur: f32,
        /// Enable the learned occlusion mask.
        #[serde(default)]
        occlusion_mask: bool,
        /// Enable the face-parser region mask.
        #[serde(default)]
        region_mask: bool,
    },
    FaceEnhancer {
        /// Logical model name, e.g. `gfpgan_1.4` or `codeformer`.
        model: String,
        /// Blend toward the enhanced crop, 0..1.
        #[serde(default = "default_enhancer_blend")]
        blend: f32,
        #[serde(default)]
        face_selector: FaceSelectorConfig,
    },
    ExpressionRestorer {
        /// Blend toward the source expression, 0..1.
        #[serde(default = "default_restore_factor")]
        restore_factor: f32,
        #[serde(default)]
        face_selector: FaceSelectorConfig,
    },
    FrameEnhancer {
        /// Logical model name, e.g. `real_esrgan_x2_fp16`.
        model: String,
        /// Blend toward the upscaled frame, 0..1.
        #[serde(default = "default_enhancer_blend")]
        blend: f32,
    },
}

fn default_mask_blur() -> f32 {
    0.3
}

fn default_enhancer_blend() -> f32 {
    0.8
}

fn default_restore_factor() -> f32 {
    0.96
}

// ============================================================================
// Validation
// ============================================================================

impl TaskConfig {
    /// Validates the recognised options and their ranges.
    ///
    /// Configuration errors surface synchronously from the runner entry
    /// point and abort the task before any media is touched.
    pub fn validate(&self) -> Result<()> {
        if self.config_version != CONFIG_VERSION {
            return Err(VisageError::ConfigVersionMismatch {
                found: self.config_version.clone(),
                expected: CONFIG_VERSION.to_string(),
            });
        }

        if self.task_info.id.is_empty() {
            return Err(VisageError::RequiredFieldMissing("task_info.id".into()));
        }
        if !self
            .task_info
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(VisageError::ParameterOutOfRange {
                field: "task_info.id".into(),
                value: self.task_info.id.clone(),
            });
        }

        if self.io.source_paths.is_empty() {
            return Err(VisageError::RequiredFieldMissing("io.source_paths".into()));
        }
        if self.io.target_paths.is_empty() {
            return Err(VisageError::RequiredFieldMissing("io.target_paths".into()));
        }
        if self.io.output.path.is_empty() {
            return Err(VisageError::RequiredFieldMissing("io.output.path".into()));
        }
        for path in self.io.source_paths.iter().chain(&self.io.target_paths) {
            if !Path::new(path).exists() {
                return Err(VisageError::InvalidPath {
                    field: "io.source_paths/io.target_paths".into(),
                    path: path.clone(),
                });
            }
        }

        match self.io.output.image_format.as_str() {
            "png" | "jpg" | "jpeg" | "bmp" => {}
            other => {
                return Err(VisageError::ParameterOutOfRange {
                    field: "io.output.image_format".into(),
                    value: other.to_string(),
                })
            }
        }
        if self.io.output.video_quality > 100 {
            return Err(VisageError::ParameterOutOfRange {
                field: "io.output.video_quality".into(),
                value: self.io.output.video_quality.to_string(),
            });
        }
        if self.io.output.image_quality > 100 {
            return Err(VisageError::ParameterOutOfRange {
                field: "io.output.image_quality".into(),
                value: self.io.output.image_quality.to_string(),
            });
        }

        check_unit_range(
            "face_analysis.face_detector.score_threshold",
            self.face_analysis.face_detector.score_threshold,
        )?;
        check_unit_range(
            "face_analysis.face_detector.iou_threshold",
            self.face_analysis.face_detector.iou_threshold,
        )?;
        check_unit_range(
            "face_analysis.face_recognizer.similarity_threshold",
            self.face_analysis.face_recognizer.similarity_threshold,
        )?;

        if self.resource.max_queue_size == 0 {
            return Err(VisageError::ParameterOutOfRange {
                field: "resource.max_queue_size".into(),
                value: "0".into(),
            });
        }
        if self.resource.max_concurrent_gpu_tasks == 0 {
            return Err(VisageError::ParameterOutOfRange {
                field: "resource.max_concurrent_gpu_tasks".into(),
                value: "0".into(),
            });
        }

        for (i, step) in self.pipeline.iter().enumerate() {
            step.validate(i)?;
        }

        Ok(())
    }

    /// Enabled steps, in configured order.
    pub fn enabled_steps(&self) -> impl Iterator<Item = &PipelineStep> {
        self.pipeline.iter().filter(|s| s.enabled)
    }
}

impl PipelineStep {
    fn validate(&self, index: usize) -> Result<()> {
        let field = |name: &str| format!("pipeline[{index}].params.{name}");
        match &self.params {
            StepParams::FaceSwapper {
                model, mask_blur, ..
            } => {
                if model.is_empty() {
                    return Err(VisageError::RequiredFieldMissing(field("model")));
                }
                check_unit_range(&field("mask_blur"), *mask_blur)?;
            }
            StepParams::FaceEnhancer { model, blend, .. }
            | StepParams::FrameEnhancer { model, blend } => {
                if model.is_empty() {
                    return Err(VisageError::RequiredFieldMissing(field("model")));
                }
                check_unit_range(&field("blend"), *blend)?;
            }
            StepParams::ExpressionRestorer { restore_factor, .. } => {
                check_unit_range(&field("restore_factor"), *restore_factor)?;
            }
        }
        Ok(())
    }
}

fn check_unit_range(field: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(VisageError::ParameterOutOfRange {
            field: field.to_string(),
            value: value.to_string(),
        })
    }
}
