//! Still-image processing path.

use std::path::{Path, PathBuf};

use crate::errors::{Result, VisageError};
use crate::pipeline::{FrameData, Pipeline};
use crate::processors::ATTR_SOURCE_FRAME;
use crate::vision::io;

use super::{apply_conflict_policy, generate_output_path, RunnerContext};

/// Runs one target image through the stage chain as a one-frame stream.
pub struct ImageRunner<'a> {
    context: &'a RunnerContext,
}

impl<'a> ImageRunner<'a> {
    #[must_use]
    pub(crate) fn new(context: &'a RunnerContext) -> Self {
        Self { context }
    }

    /// Processes `target`; returns the written path, or `None` when the
    /// conflict policy skipped the target.
    pub fn run(&self, target: &Path) -> Result<Option<PathBuf>> {
        let context = self.context;
        let output_config = &context.task.io.output;

        let intended = generate_output_path(target, output_config, true)?;
        let Some(output_path) =
            apply_conflict_policy(intended, output_config.conflict_policy)
        else {
            return Ok(None);
        };

        let image = io::read_image(target)?;

        let pipeline = Pipeline::new(&context.pipeline_config(false), context.build_stages()?);
        pipeline.start();

        let mut frame = FrameData::new(0, image);
        frame.source_embedding = context.source_embedding.clone();
        if context.needs_source_frame() {
            frame.set_attribute(ATTR_SOURCE_FRAME, frame.image.clone());
        }
        pipeline.push_frame(frame)?;
        pipeline.push_frame(FrameData::end_of_stream(1))?;

        let mut processed = None;
        while let Some(frame) = pipeline.pop_frame() {
            if frame.is_end_of_stream {
                break;
            }
            if frame.failed {
                context
                    .failed_frames
                    .fetch_add(1, std::sync::atomic::Ordering::AcqRel);
            }
            processed = Some(frame.image);
        }
        pipeline.stop();

        if context.cancelled() {
            return Err(VisageError::Cancelled);
        }
        let Some(result) = processed else {
            return Err(VisageError::OutputWriteFailed(format!(
                "{}: pipeline produced no frame",
                target.display()
            )));
        };

        io::write_image(
            &output_path,
            &result,
            &output_config.image_format,
            output_config.image_quality,
        )?;
        Ok(Some(output_path))
    }
}
