//! Identity swap (InSwapper 128 family).

use std::fs;

use half::f16;
use ndarray::Array2;

use crate::errors::{Result, VisageError};
use crate::face::helper::WarpTemplate;
use crate::face::{Embedding, FaceSelectorOptions};
use crate::inference::{SessionHandle, SessionKey, SessionRegistry};
use crate::masks::{MaskComposer, MaskRequest};
use crate::pipeline::FrameData;
use crate::vision::{tensor, warp, Frame};

use super::{selector_analysis, FrameProcessor, ProcessorContext};

/// Swaps every selected target face to the source identity.
///
/// Per face: warp to the 128x128 ArcFace crop, run the swap model with the
/// source embedding projected through the model's emap matrix, and paste
/// the result back under the composed mask.
pub struct FaceSwapper {
    session: SessionHandle,
    /// The model-embedded `emap` initializer, `emb_len` x `emb_len`
    /// row-major.
    matrix: Vec<f32>,
    emb_len: usize,
    crop_size: (u32, u32),
    composer: MaskComposer,
    mask_request: MaskRequest,
    selector: FaceSelectorOptions,
    analyser: std::sync::Arc<crate::face::FaceAnalyser>,
}

impl FaceSwapper {
    pub fn new(
        ctx: &ProcessorContext,
        model: &str,
        selector: FaceSelectorOptions,
        mask_padding: [i32; 4],
        mask_blur: f32,
        occlusion_mask: bool,
        region_mask: bool,
    ) -> Result<Self> {
        let mut session_options = ctx.session.clone();
        session_options.fp16 = model.ends_with("_fp16");

        let session = SessionRegistry::global().get_session(&SessionKey::new(
            ctx.repo.resolve(model)?,
            session_options.clone(),
        ))?;
        let crop_size = session.input_hw_for("target").unwrap_or((128, 128));
        let matrix = load_matrix(ctx, model, session_options.fp16)?;
        let emb_len = (matrix.len() as f64).sqrt() as usize;
        if emb_len * emb_len != matrix.len() {
            return Err(VisageError::ModelLoadFailed {
                path: model.to_string(),
                reason: format!("initializer matrix is not square ({} values)", matrix.len()),
            });
        }

        let mask_request = MaskRequest {
            padding: mask_padding,
            blur: mask_blur,
            occlusion: occlusion_mask,
            region: region_mask,
            regions: Vec::new(),
        };
        let composer = MaskComposer::new(&ctx.repo, &session_options, &mask_request)?;

        Ok(Self {
            session,
            matrix,
            emb_len,
            crop_size: (crop_size.1 as u32, crop_size.0 as u32),
            composer,
            mask_request,
            selector,
            analyser: std::sync::Arc::clone(&ctx.analyser),
        })
    }

    /// Projects the raw source embedding through the emap matrix and
    /// divides by the embedding norm, matching the model's training-time
    /// latent preparation.
    fn prepare_source_embedding(&self, embedding: &Embedding) -> Vec<f32> {
        let n = self.emb_len.min(embedding.len());
        let norm: f64 = embedding
            .iter()
            .map(|v| f64::from(*v) * f64::from(*v))
            .sum::<f64>()
            .sqrt();
        let norm = if norm <= f64::EPSILON { 1.0 } else { norm };

        let mut projected = vec![0.0_f32; n];
        for (i, out) in projected.iter_mut().enumerate() {
            let mut sum = 0.0_f64;
            for (j, v) in embedding.iter().enumerate().take(n) {
                sum += f64::from(*v) * f64::from(self.matrix[j * self.emb_len + i]);
            }
            *out = (sum / norm) as f32;
        }
        projected
    }

    fn swap_face(
        &self,
        frame: &Frame,
        landmark5: &crate::face::Landmarks,
        source: &[f32],
    ) -> Result<Frame> {
        let transform = warp::estimate_from_landmarks(
            landmark5.as_slice(),
            &WarpTemplate::Arcface128V2.points(),
            self.crop_size,
        );
        let crop = warp::warp_frame(frame, transform, self.crop_size, warp::Border::Replicate);

        let mask = self.composer.compose(&crop, &self.mask_request)?;

        let mut source_input = Array2::<f32>::zeros((1, source.len()));
        source_input.row_mut(0).assign(&ndarray::ArrayView1::from(source));

        let outputs = self.session.run(vec![
            ("source", source_input.into_dyn()),
            (
                "target",
                tensor::chw_input(&crop, [0.0; 3], [1.0; 3]).into_dyn(),
            ),
        ])?;

        let out = &outputs[0];
        let (h, w) = match out.shape.as_slice() {
            [_, _, h, w] => (*h as usize, *w as usize),
            _ => (self.crop_size.1 as usize, self.crop_size.0 as usize),
        };
        let swapped = tensor::frame_from_chw_unit(&out.data, h, w);

        Ok(warp::paste_back(frame, &swapped, &mask, transform))
    }
}

impl FrameProcessor for FaceSwapper {
    fn name(&self) -> &str {
        "face_swapper"
    }

    fn process(&self, frame: &mut FrameData) -> Result<()> {
        let Some(source_embedding) = frame.source_embedding.clone() else {
            log::warn!("Face swapper has no source embedding; passing frame through");
            return Ok(());
        };

        let faces = self.analyser.get_faces(
            &frame.image,
            selector_analysis(&self.selector),
            &self.selector,
        )?;
        if faces.is_empty() {
            return Ok(());
        }

        let source = self.prepare_source_embedding(&source_embedding);
        let mut result = frame.image.clone();
        for face in &faces {
            if face.is_empty() {
                continue;
            }
            result = self.swap_face(&result, &face.landmark5_preferred(), &source)?;
        }
        frame.image = result;
        Ok(())
    }
}

/// Reads the raw initializer-matrix sidecar (f32 little-endian, or f16 for
/// the fp16 model variant).
fn load_matrix(ctx: &ProcessorContext, model: &str, fp16: bool) -> Result<Vec<f32>> {
    let path = ctx.repo.resolve_matrix(model)?;
    let bytes = fs::read(&path)?;
    let matrix = if fp16 {
        bytes
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect()
    } else {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    };
    Ok(matrix)
}
