//! Video processing path: streaming (Tolerant) and staged-on-disk
//! (Strict) runners.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::config::{AudioPolicy, MemoryStrategy, PipelineStep, StepKind};
use crate::errors::{Result, VisageError};
use crate::media::{remux_audio, VideoReader, VideoWriter};
use crate::pipeline::{FrameData, Pipeline};
use crate::processors::{build_processor, FrameProcessor, ProcessorContext, ATTR_SOURCE_FRAME};

use super::checkpoint::{CheckpointManager, CheckpointRecord};
use super::{apply_conflict_policy, generate_output_path, RunnerContext};

/// Checkpoint every this many produced frames.
const CHECKPOINT_INTERVAL: i64 = 100;

const CHECKPOINT_DIR: &str = "./checkpoints";

/// Runs one target video through the stage chain.
pub struct VideoRunner<'a> {
    context: &'a RunnerContext,
}

impl<'a> VideoRunner<'a> {
    #[must_use]
    pub(crate) fn new(context: &'a RunnerContext) -> Self {
        Self { context }
    }

    /// Processes `target`; returns the written path, or `None` when the
    /// conflict policy skipped the target.
    pub fn run(&self, target: &Path) -> Result<Option<PathBuf>> {
        let output_config = &self.context.task.io.output;
        let intended = generate_output_path(target, output_config, false)?;
        let Some(output_path) = apply_conflict_policy(intended, output_config.conflict_policy)
        else {
            return Ok(None);
        };

        match self.context.task.resource.memory_strategy {
            MemoryStrategy::Tolerant => self.run_streaming(target, &output_path),
            MemoryStrategy::Strict => self.run_strict(target, &output_path),
        }
        .map(Some)
    }

    // ========================================================================
    // Streaming (Tolerant) mode
    // ========================================================================

    fn run_streaming(&self, target: &Path, output_path: &Path) -> Result<PathBuf> {
        let context = self.context;
        let needs_muxing = context.task.io.output.audio_policy == AudioPolicy::Copy;
        let intermediate = if needs_muxing {
            temp_sibling(output_path)
        } else {
            output_path.to_path_buf()
        };

        let mut reader = VideoReader::open(target)
            .map_err(|_| VisageError::VideoOpenFailed(target.display().to_string()))?;
        let total_frames = reader.meta().frame_count;

        // resume
        let mut start_frame = 0_i64;
        let checkpoints = context
            .task
            .task_info
            .enable_resume
            .then(|| CheckpointManager::new(CHECKPOINT_DIR));
        if let Some(manager) = &checkpoints {
            if let Some(saved) = manager.load(&context.task.task_info.id, &context.config_hash) {
                start_frame = saved.last_completed_frame + 1;
                if total_frames > 0 && start_frame >= total_frames {
                    log::info!("Task {} already completed; nothing to resume", context.task.task_info.id);
                    manager.cleanup(&context.task.task_info.id);
                    return Ok(output_path.to_path_buf());
                }
                match VideoReader::open_at(target, start_frame) {
                    Ok(seeked) => {
                        log::info!("Resuming from frame {start_frame}/{total_frames}");
                        reader = seeked;
                    }
                    Err(err) => {
                        log::warn!("Seek to frame {start_frame} failed ({err}); starting over");
                        start_frame = 0;
                    }
                }
            }
        }

        let pipeline = Pipeline::new(&context.pipeline_config(false), context.build_stages()?);
        pipeline.start();

        let pass = StreamPass {
            context,
            pipeline: &pipeline,
            intermediate: &intermediate,
            fps: reader.meta().fps,
            start_frame,
            total_frames,
            checkpoints: checkpoints.as_ref(),
            output_path,
            source_reader: None,
        };
        let outcome = pass.drive(&mut reader);
        pipeline.stop();

        if context.cancelled() {
            remove_if_exists(&intermediate);
            if needs_muxing {
                remove_if_exists(output_path);
            }
            return Err(VisageError::Cancelled);
        }
        outcome?;

        if let Some(manager) = &checkpoints {
            manager.cleanup(&context.task.task_info.id);
        }

        finalize_output(&intermediate, target, output_path, needs_muxing)?;
        Ok(output_path.to_path_buf())
    }

    // ========================================================================
    // Staged (Strict) mode
    // ========================================================================

    /// Processes one stage at a time across the whole stream, staging
    /// intermediates on disk with the queue clamped, so resident memory
    /// stays bounded by a handful of frames per pass.
    fn run_strict(&self, target: &Path, output_path: &Path) -> Result<PathBuf> {
        let context = self.context;
        if context.task.task_info.enable_resume {
            // staged intermediates are temporary, so a killed strict run
            // restarts from the first frame
            log::info!("Strict memory mode restarts from frame 0; checkpoints are not written");
        }

        let needs_muxing = context.task.io.output.audio_policy == AudioPolicy::Copy;
        let final_intermediate = if needs_muxing {
            temp_sibling(output_path)
        } else {
            output_path.to_path_buf()
        };

        let steps = context.enabled_steps();
        let processor_ctx = ProcessorContext {
            repo: Arc::clone(&context.repo),
            analyser: Arc::clone(&context.analyser),
            session: context.session.clone(),
            similarity_threshold: context
                .task
                .face_analysis
                .face_recognizer
                .similarity_threshold,
        };

        let mut current_input = target.to_path_buf();
        let pass_count = steps.len().max(1);
        for (index, step) in steps.iter().enumerate().take(pass_count) {
            let is_last = index + 1 == pass_count;
            let pass_output = if is_last {
                final_intermediate.clone()
            } else {
                stage_temp_path(output_path, index)
            };

            let stage = build_processor(step, &processor_ctx)?;
            let result = self.run_single_pass(&current_input, target, &pass_output, stage, step);

            // the staged input is consumed once the next pass has read it
            if current_input != target {
                remove_if_exists(&current_input);
            }
            if context.cancelled() || result.is_err() {
                remove_if_exists(&pass_output);
                if needs_muxing {
                    remove_if_exists(output_path);
                }
                result?;
                return Err(VisageError::Cancelled);
            }
            current_input = pass_output;
        }

        if steps.is_empty() {
            // no enabled stages: the stream still flows through once
            let stage = PassthroughStage;
            self.run_passthrough(target, &final_intermediate, Box::new(stage))?;
        }

        finalize_output(&final_intermediate, target, output_path, needs_muxing)?;
        Ok(output_path.to_path_buf())
    }

    fn run_single_pass(
        &self,
        input: &Path,
        original: &Path,
        output: &Path,
        stage: Box<dyn FrameProcessor>,
        step: &PipelineStep,
    ) -> Result<()> {
        let context = self.context;
        let mut reader = VideoReader::open(input)
            .map_err(|_| VisageError::VideoOpenFailed(input.display().to_string()))?;

        // the expression restorer reads its source expression from the
        // original stream, which a staged intermediate no longer carries
        let source_reader = if step.step == StepKind::ExpressionRestorer && input != original {
            Some(VideoReader::open(original)?)
        } else {
            None
        };

        let pipeline = Pipeline::new(&context.pipeline_config(true), vec![stage]);
        pipeline.start();

        let pass = StreamPass {
            context,
            pipeline: &pipeline,
            intermediate: output,
            fps: reader.meta().fps,
            start_frame: 0,
            total_frames: reader.meta().frame_count,
            checkpoints: None,
            output_path: output,
            source_reader,
        };
        let outcome = pass.drive(&mut reader);
        pipeline.stop();
        outcome
    }

    fn run_passthrough(
        &self,
        input: &Path,
        output: &Path,
        stage: Box<dyn FrameProcessor>,
    ) -> Result<()> {
        let context = self.context;
        let mut reader = VideoReader::open(input)
            .map_err(|_| VisageError::VideoOpenFailed(input.display().to_string()))?;
        let pipeline = Pipeline::new(&context.pipeline_config(true), vec![stage]);
        pipeline.start();
        let pass = StreamPass {
            context,
            pipeline: &pipeline,
            intermediate: output,
            fps: reader.meta().fps,
            start_frame: 0,
            total_frames: reader.meta().frame_count,
            checkpoints: None,
            output_path: output,
            source_reader: None,
        };
        let outcome = pass.drive(&mut reader);
        pipeline.stop();
        outcome
    }
}

/// One producer/writer cycle over a frame stream.
struct StreamPass<'a> {
    context: &'a RunnerContext,
    pipeline: &'a Pipeline,
    intermediate: &'a Path,
    fps: f64,
    start_frame: i64,
    total_frames: i64,
    checkpoints: Option<&'a CheckpointManager>,
    output_path: &'a Path,
    /// Secondary reader supplying original frames for expression restore
    /// passes in strict mode.
    source_reader: Option<VideoReader>,
}

impl StreamPass<'_> {
    /// Feeds the pipeline from `reader` while a writer thread drains it
    /// into the intermediate file. Returns once both sides are done.
    fn drive(mut self, reader: &mut VideoReader) -> Result<()> {
        let context = self.context;
        let encoder = context.task.io.output.video_encoder.clone();
        let quality = context.task.io.output.video_quality;

        let last_written = Arc::new(AtomicI64::new(self.start_frame - 1));
        let writer_failed = Arc::new(AtomicBool::new(false));

        let mut source_reader = self.source_reader.take();
        let attach_source = context.needs_source_frame();

        std::thread::scope(|scope| -> Result<()> {
            let writer_handle = {
                let pipeline = self.pipeline;
                let last_written = Arc::clone(&last_written);
                let writer_failed = Arc::clone(&writer_failed);
                let intermediate = self.intermediate.to_path_buf();
                let failed_frames = Arc::clone(&context.failed_frames);
                let fps = self.fps;
                let encoder = encoder.clone();
                scope.spawn(move || -> Result<()> {
                    let mut writer: Option<VideoWriter> = None;
                    while let Some(frame) = pipeline.pop_frame() {
                        if frame.is_end_of_stream {
                            break;
                        }
                        if frame.failed {
                            failed_frames.fetch_add(1, Ordering::AcqRel);
                        }
                        if writer.is_none() {
                            // sized lazily: stages may rescale the stream
                            match VideoWriter::open(
                                &intermediate,
                                frame.image.width(),
                                frame.image.height(),
                                fps,
                                &encoder,
                                quality,
                            ) {
                                Ok(opened) => writer = Some(opened),
                                Err(err) => {
                                    writer_failed.store(true, Ordering::Release);
                                    return Err(err);
                                }
                            }
                        }
                        if let Err(err) =
                            writer.as_mut().expect("writer opened above").write_frame(&frame.image)
                        {
                            writer_failed.store(true, Ordering::Release);
                            return Err(err);
                        }
                        last_written.store(frame.sequence_id, Ordering::Release);
                    }
                    if let Some(writer) = writer {
                        if let Err(err) = writer.finish() {
                            writer_failed.store(true, Ordering::Release);
                            return Err(err);
                        }
                    }
                    Ok(())
                })
            };

            // producer loop
            let max_frames = context.task.resource.max_frames as i64;
            let mut sequence_id = self.start_frame;
            while !context.cancelled() && !writer_failed.load(Ordering::Acquire) {
                if max_frames > 0 && sequence_id >= max_frames {
                    break;
                }
                let image = match reader.read_frame() {
                    Ok(Some(image)) => image,
                    Ok(None) => break,
                    Err(err) => {
                        // a terminal decode error ends the stream early but
                        // does not fail the task
                        log::error!("Frame {sequence_id}: {err}; ending stream");
                        break;
                    }
                };

                let mut frame = FrameData::new(sequence_id, image);
                frame.timestamp_ms = Some((sequence_id as f64 / self.fps * 1000.0) as i64);
                frame.source_embedding = context.source_embedding.clone();
                if attach_source {
                    let source_image = source_reader
                        .as_mut()
                        .and_then(|secondary| secondary.read_frame().ok().flatten())
                        .unwrap_or_else(|| frame.image.clone());
                    frame.set_attribute(ATTR_SOURCE_FRAME, source_image);
                }

                if self.pipeline.push_frame(frame).is_err() {
                    break;
                }
                sequence_id += 1;

                if let Some(manager) = self.checkpoints {
                    if sequence_id % CHECKPOINT_INTERVAL == 0 {
                        self.save_checkpoint(manager, last_written.load(Ordering::Acquire));
                    }
                }
            }

            let _ = self.pipeline.push_frame(FrameData::end_of_stream(sequence_id));
            self.pipeline.finish_input();

            match writer_handle.join() {
                Ok(result) => result,
                Err(_) => Err(VisageError::OutputWriteFailed(format!(
                    "{}: writer thread panicked",
                    self.intermediate.display()
                ))),
            }
        })
    }

    /// Checkpoints only advance, and only cover frames the writer has
    /// already committed to the intermediate output.
    fn save_checkpoint(&self, manager: &CheckpointManager, last_written: i64) {
        if last_written < 0 {
            return;
        }
        let record = CheckpointRecord {
            task_id: self.context.task.task_info.id.clone(),
            config_hash: self.context.config_hash.clone(),
            last_completed_frame: last_written,
            total_frames: self.total_frames,
            output_path: self.output_path.display().to_string(),
        };
        if let Err(err) = manager.save(&record) {
            log::warn!("Checkpoint save failed: {err}");
        }
    }
}

/// Stage used when strict mode runs with an empty step list.
struct PassthroughStage;

impl FrameProcessor for PassthroughStage {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn uses_gpu(&self) -> bool {
        false
    }

    fn process(&self, _frame: &mut FrameData) -> Result<()> {
        Ok(())
    }
}

fn temp_sibling(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map_or_else(|| "output".to_string(), |n| n.to_string_lossy().into_owned());
    name.push_str(".temp.mp4");
    output.with_file_name(name)
}

fn stage_temp_path(output: &Path, stage_index: usize) -> PathBuf {
    let stem = output
        .file_stem()
        .map_or_else(|| "stage".to_string(), |s| s.to_string_lossy().into_owned());
    output.with_file_name(format!(
        ".{stem}.stage{stage_index}.{}.mp4",
        Uuid::new_v4()
    ))
}

fn remove_if_exists(path: &Path) {
    if path.exists() {
        let _ = fs::remove_file(path);
    }
}

fn finalize_output(
    intermediate: &Path,
    original: &Path,
    output: &Path,
    needs_muxing: bool,
) -> Result<()> {
    if !needs_muxing {
        return Ok(());
    }
    match remux_audio(intermediate, original, output) {
        Ok(()) => {
            remove_if_exists(intermediate);
            Ok(())
        }
        Err(err) => {
            // keep the silent video rather than losing the whole run
            log::error!("{} audio remux failed: {err}; keeping video-only output", output.display());
            remove_if_exists(output);
            fs::rename(intermediate, output)?;
            Ok(())
        }
    }
}
