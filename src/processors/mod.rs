//! Frame Processors
//!
//! Each processor is one pipeline stage: given a mutable [`FrameData`], it
//! either replaces the image with a transformed one or enriches the
//! attribute map for downstream stages. Processors are pure with respect to
//! model state — sessions are shared through the registry — and must be
//! callable concurrently from multiple worker threads.
//!
//! Model-family specifics (InSwapper, GFPGAN, CodeFormer, LivePortrait,
//! Real-ESRGAN, Real-HATGAN) stay private to their processor; the engine
//! only sees the [`FrameProcessor`] trait.

mod expression_restorer;
mod face_enhancer;
mod face_swapper;
mod frame_enhancer;

pub use expression_restorer::ExpressionRestorer;
pub use face_enhancer::FaceEnhancer;
pub use face_swapper::FaceSwapper;
pub use frame_enhancer::FrameEnhancer;

use std::sync::Arc;

use crate::config::{FaceSelectorConfig, PipelineStep, SelectorMode, StepParams};
use crate::errors::Result;
use crate::face::{FaceAnalyser, FaceAnalysis, FaceSelectorOptions};
use crate::inference::SessionOptions;
use crate::models::ModelRepository;
use crate::pipeline::FrameData;
use crate::vision::{io, Frame};

/// Attribute key under which the runner stores the unprocessed input
/// frame, for stages that need the original pixels (expression restore).
pub const ATTR_SOURCE_FRAME: &str = "source_frame";

/// A single pipeline stage.
pub trait FrameProcessor: Send + Sync {
    /// Stable name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Whether executions should count against the GPU semaphore.
    fn uses_gpu(&self) -> bool {
        true
    }

    /// Transforms the frame in place. An error marks the frame failed; the
    /// engine passes it through unchanged.
    fn process(&self, frame: &mut FrameData) -> Result<()>;
}

/// Everything a processor needs besides its own step params.
pub struct ProcessorContext {
    pub repo: Arc<ModelRepository>,
    pub analyser: Arc<FaceAnalyser>,
    pub session: SessionOptions,
    /// Reference-mode cosine distance cutoff from the task config.
    pub similarity_threshold: f32,
}

/// Instantiates the processor for an enabled pipeline step.
pub fn build_processor(
    step: &PipelineStep,
    ctx: &ProcessorContext,
) -> Result<Box<dyn FrameProcessor>> {
    match &step.params {
        StepParams::FaceSwapper {
            model,
            face_selector,
            mask_padding,
            mask_blur,
            occlusion_mask,
            region_mask,
        } => Ok(Box::new(FaceSwapper::new(
            ctx,
            model,
            resolve_selector(ctx, face_selector)?,
            *mask_padding,
            *mask_blur,
            *occlusion_mask,
            *region_mask,
        )?)),
        StepParams::FaceEnhancer {
            model,
            blend,
            face_selector,
        } => Ok(Box::new(FaceEnhancer::new(
            ctx,
            model,
            *blend,
            resolve_selector(ctx, face_selector)?,
        )?)),
        StepParams::ExpressionRestorer {
            restore_factor,
            face_selector,
        } => Ok(Box::new(ExpressionRestorer::new(
            ctx,
            *restore_factor,
            resolve_selector(ctx, face_selector)?,
        )?)),
        StepParams::FrameEnhancer { model, blend } => {
            Ok(Box::new(FrameEnhancer::new(ctx, model, *blend)?))
        }
    }
}

/// Builds runtime selector options, analysing the reference image once and
/// caching its face under a named store slot.
fn resolve_selector(
    ctx: &ProcessorContext,
    config: &FaceSelectorConfig,
) -> Result<FaceSelectorOptions> {
    let mut options = FaceSelectorOptions {
        config: config.clone(),
        reference: None,
        similarity_threshold: ctx.similarity_threshold,
    };
    if config.mode != SelectorMode::Reference {
        return Ok(options);
    }

    let Some(path) = &config.reference_image_path else {
        log::warn!("Reference selector mode configured without a reference image");
        return Ok(options);
    };

    let slot = format!("reference:{path}");
    let store = ctx.analyser.store();
    if let Some(faces) = store.named_faces(&slot) {
        options.reference = faces.into_iter().next();
        return Ok(options);
    }

    let frame = io::read_image(path)?;
    let analysis = FaceAnalysis::DETECTION | FaceAnalysis::LANDMARK | FaceAnalysis::EMBEDDING;
    let faces = ctx.analyser.get_many_faces(&frame, analysis)?;
    if faces.is_empty() {
        log::warn!("No face found in reference image {path}");
    } else {
        store.insert_named_faces(&slot, faces.clone());
    }
    options.reference = faces.into_iter().next();
    Ok(options)
}

/// Analysis levels a selector configuration requires beyond box and
/// landmarks.
#[must_use]
pub(crate) fn selector_analysis(selector: &FaceSelectorOptions) -> FaceAnalysis {
    let mut analysis = FaceAnalysis::DETECTION | FaceAnalysis::LANDMARK;
    if selector.config.mode == SelectorMode::Reference {
        analysis |= FaceAnalysis::EMBEDDING;
    }
    let filters_attributes = selector.config.gender != crate::config::GenderFilter::All
        || selector.config.race != crate::config::RaceFilter::All
        || selector.config.age_range != (0, 100);
    if filters_attributes {
        analysis |= FaceAnalysis::GENDER_AGE;
    }
    analysis
}

/// Linear blend `factor * top + (1 - factor) * base`, sizes matching.
#[must_use]
pub(crate) fn blend_frames(base: &Frame, top: &Frame, factor: f32) -> Frame {
    debug_assert_eq!(base.width(), top.width());
    debug_assert_eq!(base.height(), top.height());
    let factor = factor.clamp(0.0, 1.0);
    let mut out = base.clone();
    let top_data = top.data();
    for (o, t) in out.data_mut().iter_mut().zip(top_data.iter()) {
        *o = (factor * f32::from(*t) + (1.0 - factor) * f32::from(*o)).round() as u8;
    }
    out
}

/// Fetches the untouched input frame stashed by the runner, falling back
/// to the current image.
pub(crate) fn source_frame_of(frame: &FrameData) -> Arc<Frame> {
    frame
        .attribute::<Frame>(ATTR_SOURCE_FRAME)
        .unwrap_or_else(|| Arc::new(frame.image.clone()))
}
