//! Pipeline Runners
//!
//! The runner owns a task end to end: it validates configuration, loads the
//! model stack, computes the source identity, and drives each target
//! through the pipeline engine — one-frame streams for images, bounded
//! producer/writer streams for videos, with checkpoint-based resume and a
//! strict staged-on-disk mode for constrained memory.

mod checkpoint;
mod image;
mod output;
mod video;

pub use checkpoint::{CheckpointManager, CheckpointRecord};
pub use image::ImageRunner;
pub use output::{apply_conflict_policy, generate_output_path};
pub use video::VideoRunner;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{
    config_fingerprint, AppConfig, ExecutionOrder, PipelineStep, StepKind, TaskConfig,
};
use crate::errors::{ErrorCode, Result, VisageError};
use crate::face::{Embedding, FaceAnalyser, FaceAnalyserOptions, FaceStore};
use crate::inference::{provider_chain, SessionOptions, SessionRegistry};
use crate::models::ModelRepository;
use crate::pipeline::PipelineConfig;
use crate::processors::{build_processor, FrameProcessor, ProcessorContext};
use crate::vision::io;

/// Store slot holding the averaged source face for the current task.
const SOURCE_FACE_SLOT: &str = "source_average";

/// Queue bound enforced in strict memory mode.
const STRICT_QUEUE_CAP: usize = 4;

/// Completion summary for one task.
#[derive(Debug)]
pub struct TaskOutcome {
    pub code: ErrorCode,
    pub message: String,
    /// Path involved in a failure, when one is known.
    pub path: Option<String>,
    /// Files produced before the task ended.
    pub outputs: Vec<PathBuf>,
    /// Frames that passed through unprocessed after a stage failure.
    pub failed_frames: u64,
}

impl TaskOutcome {
    /// Mapped process exit code.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == ErrorCode::Ok
    }
}

/// Shared state for the per-target runners.
pub(crate) struct RunnerContext {
    pub task: TaskConfig,
    pub repo: Arc<ModelRepository>,
    pub analyser: Arc<FaceAnalyser>,
    pub session: SessionOptions,
    pub source_embedding: Option<Arc<Embedding>>,
    pub config_hash: String,
    pub cancel: Arc<AtomicBool>,
    pub failed_frames: Arc<AtomicU64>,
}

impl RunnerContext {
    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Instantiates the processors for the enabled steps, in order.
    pub fn build_stages(&self) -> Result<Vec<Box<dyn FrameProcessor>>> {
        let ctx = ProcessorContext {
            repo: Arc::clone(&self.repo),
            analyser: Arc::clone(&self.analyser),
            session: self.session.clone(),
            similarity_threshold: self
                .task
                .face_analysis
                .face_recognizer
                .similarity_threshold,
        };
        self.task
            .enabled_steps()
            .map(|step| build_processor(step, &ctx))
            .collect()
    }

    /// Enabled steps, for per-stage strict passes.
    pub fn enabled_steps(&self) -> Vec<PipelineStep> {
        self.task.enabled_steps().cloned().collect()
    }

    /// True when some enabled stage needs the untouched input frame.
    pub fn needs_source_frame(&self) -> bool {
        self.task
            .enabled_steps()
            .any(|step| step.step == StepKind::ExpressionRestorer)
    }

    pub fn pipeline_config(&self, strict: bool) -> PipelineConfig {
        let resource = &self.task.resource;
        let mut max_queue_size = resource.max_queue_size as usize;
        if strict {
            max_queue_size = max_queue_size.min(STRICT_QUEUE_CAP);
        }
        PipelineConfig {
            max_queue_size,
            worker_thread_count: resource.effective_thread_count(),
            max_concurrent_gpu_tasks: resource.max_concurrent_gpu_tasks as usize,
        }
    }
}

/// Drives one [`TaskConfig`] to completion.
pub struct TaskRunner {
    task: TaskConfig,
    app: AppConfig,
    cancel: Arc<AtomicBool>,
}

impl TaskRunner {
    #[must_use]
    pub fn new(task: TaskConfig, app: AppConfig) -> Self {
        Self {
            task,
            app,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative cancellation flag; set it from any thread to stop the
    /// task at the next suspension point.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Runs the task and folds the result into a [`TaskOutcome`].
    pub fn execute(&self) -> TaskOutcome {
        let failed_frames = Arc::new(AtomicU64::new(0));
        let result = self.run(&failed_frames);
        let failed = failed_frames.load(Ordering::Acquire);
        if failed > 0 {
            log::warn!("{failed} frame(s) passed through unprocessed after stage failures");
        }

        match result {
            Ok(outputs) => TaskOutcome {
                code: ErrorCode::Ok,
                message: format!("Processed {} target(s)", outputs.len()),
                path: None,
                outputs,
                failed_frames: failed,
            },
            Err(err) => TaskOutcome {
                code: err.code(),
                message: err.to_string(),
                path: match &err {
                    VisageError::InvalidPath { path, .. } => Some(path.clone()),
                    VisageError::ModelNotFound(path)
                    | VisageError::VideoOpenFailed(path)
                    | VisageError::OutputWriteFailed(path) => Some(path.clone()),
                    _ => None,
                },
                outputs: Vec::new(),
                failed_frames: failed,
            },
        }
    }

    fn run(&self, failed_frames: &Arc<AtomicU64>) -> Result<Vec<PathBuf>> {
        self.task.validate()?;

        let repo = Arc::new(ModelRepository::open(&self.app.models.path)?);
        let session = SessionOptions {
            providers: provider_chain(&self.app.inference),
            device_id: self.app.inference.device_id,
            workspace_limit_bytes: self.app.inference.workspace_limit_bytes,
            fp16: false,
        };

        let store = Arc::clone(FaceStore::global());
        store.clear();
        let analyser = Arc::new(FaceAnalyser::new(
            &repo,
            FaceAnalyserOptions::from_config(&self.task.face_analysis, session.clone()),
            Arc::clone(&store),
        )?);

        let context = RunnerContext {
            source_embedding: self.compute_source_embedding(&analyser)?,
            config_hash: config_fingerprint(&self.task),
            task: self.task.clone(),
            repo,
            analyser,
            session,
            cancel: Arc::clone(&self.cancel),
            failed_frames: Arc::clone(failed_frames),
        };

        let result = self.run_targets(&context);

        // explicit teardown so GPU contexts release with the task
        store.clear();
        SessionRegistry::global().cleanup_expired(std::time::Duration::ZERO);
        result
    }

    fn run_targets(&self, context: &RunnerContext) -> Result<Vec<PathBuf>> {
        let mut targets: Vec<PathBuf> = self
            .task
            .io
            .target_paths
            .iter()
            .map(PathBuf::from)
            .collect();
        if self.task.resource.execution_order == ExecutionOrder::Batch {
            // group stills ahead of videos; within a group the configured
            // order is kept
            targets.sort_by_key(|p| usize::from(!io::is_image_path(p)));
        }

        let mut outputs = Vec::new();
        for target in targets {
            if context.cancelled() {
                return Err(VisageError::Cancelled);
            }
            let produced = if io::is_image_path(&target) {
                ImageRunner::new(context).run(&target)?
            } else {
                VideoRunner::new(context).run(&target)?
            };
            if let Some(path) = produced {
                log::info!("Wrote {}", path.display());
                outputs.push(path);
            }
            // faces cached for this target cannot help the next one
            context.analyser.store().clear();
        }
        Ok(outputs)
    }

    /// Analyses every source image and caches the averaged face; its raw
    /// embedding feeds the swapper through each frame's shared handle.
    fn compute_source_embedding(
        &self,
        analyser: &Arc<FaceAnalyser>,
    ) -> Result<Option<Arc<Embedding>>> {
        let needs_source = self
            .task
            .enabled_steps()
            .any(|step| step.step == StepKind::FaceSwapper);
        if !needs_source {
            return Ok(None);
        }

        let mut frames = Vec::with_capacity(self.task.io.source_paths.len());
        for path in &self.task.io.source_paths {
            frames.push(io::read_image(path)?);
        }
        let Some(face) = analyser.get_average_face(&frames)? else {
            return Err(VisageError::RequiredFieldMissing(
                "io.source_paths: no detectable face".into(),
            ));
        };
        let embedding = Arc::new(face.embedding.clone());
        analyser
            .store()
            .insert_named_faces(SOURCE_FACE_SLOT, vec![face]);
        Ok(Some(embedding))
    }
}
