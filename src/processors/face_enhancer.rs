//! Face enhancement (GFPGAN / CodeFormer).

use ndarray::Array1;

use crate::errors::Result;
use crate::face::helper::WarpTemplate;
use crate::face::FaceSelectorOptions;
use crate::inference::{SessionHandle, SessionKey, SessionRegistry};
use crate::masks::{MaskComposer, MaskRequest};
use crate::pipeline::FrameData;
use crate::vision::{tensor, warp, Frame};

use super::{blend_frames, selector_analysis, FrameProcessor, ProcessorContext};

/// Restores each selected face through an enhancement model and blends the
/// result with the original by the configured factor.
pub struct FaceEnhancer {
    session: SessionHandle,
    crop_size: (u32, u32),
    blend: f32,
    /// CodeFormer takes an extra fidelity weight input.
    takes_weight: bool,
    composer: MaskComposer,
    mask_request: MaskRequest,
    selector: FaceSelectorOptions,
    analyser: std::sync::Arc<crate::face::FaceAnalyser>,
}

impl FaceEnhancer {
    pub fn new(
        ctx: &ProcessorContext,
        model: &str,
        blend: f32,
        selector: FaceSelectorOptions,
    ) -> Result<Self> {
        let session = SessionRegistry::global().get_session(&SessionKey::new(
            ctx.repo.resolve(model)?,
            ctx.session.clone(),
        ))?;
        let crop = session.input_hw(0).unwrap_or((512, 512));
        let takes_weight = session.input_names().iter().any(|n| n == "weight");

        Ok(Self {
            session,
            crop_size: (crop.1 as u32, crop.0 as u32),
            blend,
            takes_weight,
            composer: MaskComposer::box_only(),
            mask_request: MaskRequest::default(),
            selector,
            analyser: std::sync::Arc::clone(&ctx.analyser),
        })
    }

    fn enhance_face(&self, frame: &Frame, landmark5: &crate::face::Landmarks) -> Result<Frame> {
        let transform = warp::estimate_from_landmarks(
            landmark5.as_slice(),
            &WarpTemplate::Ffhq512.points(),
            self.crop_size,
        );
        let crop = warp::warp_frame(frame, transform, self.crop_size, warp::Border::Replicate);
        let mask = self.composer.compose(&crop, &self.mask_request)?;

        let input_name = self
            .session
            .input_names()
            .first()
            .map_or("input", String::as_str);
        let mut inputs = vec![(
            input_name,
            tensor::chw_input(&crop, [0.5; 3], [0.5; 3]).into_dyn(),
        )];
        if self.takes_weight {
            inputs.push(("weight", Array1::from(vec![1.0_f32]).into_dyn()));
        }

        let outputs = self.session.run(inputs)?;
        let out = &outputs[0];
        let (h, w) = match out.shape.as_slice() {
            [_, _, h, w] => (*h as usize, *w as usize),
            _ => (self.crop_size.1 as usize, self.crop_size.0 as usize),
        };
        let enhanced = tensor::frame_from_chw_symmetric(&out.data, h, w);

        let pasted = warp::paste_back(frame, &enhanced, &mask, transform);
        Ok(blend_frames(frame, &pasted, self.blend))
    }
}

impl FrameProcessor for FaceEnhancer {
    fn name(&self) -> &str {
        "face_enhancer"
    }

    fn process(&self, frame: &mut FrameData) -> Result<()> {
        let faces = self.analyser.get_faces(
            &frame.image,
            selector_analysis(&self.selector),
            &self.selector,
        )?;
        if faces.is_empty() {
            return Ok(());
        }

        let mut result = frame.image.clone();
        for face in &faces {
            if face.is_empty() {
                continue;
            }
            result = self.enhance_face(&result, &face.landmark5_preferred())?;
        }
        frame.image = result;
        Ok(())
    }
}
