//! Mask Composition
//!
//! Produces the single [0, 1] alpha mask used when pasting a processed face
//! crop back into its frame. Up to three component masks are generated and
//! reduced by element-wise minimum:
//!
//! - **Box**: ones, zeroed along the padded border, feathered by a Gaussian
//!   blur derived from the configured blur fraction. Always present.
//! - **Occlusion**: a learned matte from the occluder model marking pixels
//!   where foreign objects cover the face.
//! - **Region**: a union of face-parser classes (skin, eyes, nose, mouth…).
//!
//! Learned masks are sharpened by remapping [0.5, 1] back onto [0, 1]
//! (`(max(m, 0.5) - 0.5) * 2`). The remap narrows the feather band to keep
//! seams tight; it is part of the mask contract and must not be smoothed
//! out.

use ndarray::Array2;

use crate::errors::Result;
use crate::inference::{SessionHandle, SessionKey, SessionOptions, SessionRegistry};
use crate::models::{names, ModelRepository};
use crate::vision::{gaussian_blur, resize_plane, tensor, Frame};

/// Face-parser class indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum FaceRegion {
    Skin = 1,
    LeftEyebrow = 2,
    RightEyebrow = 3,
    LeftEye = 4,
    RightEye = 5,
    Glasses = 6,
    Nose = 10,
    Mouth = 11,
    UpperLip = 12,
    LowerLip = 13,
}

impl FaceRegion {
    /// Every parsed region, for "mask the whole face" requests.
    pub const ALL: [FaceRegion; 10] = [
        FaceRegion::Skin,
        FaceRegion::LeftEyebrow,
        FaceRegion::RightEyebrow,
        FaceRegion::LeftEye,
        FaceRegion::RightEye,
        FaceRegion::Glasses,
        FaceRegion::Nose,
        FaceRegion::Mouth,
        FaceRegion::UpperLip,
        FaceRegion::LowerLip,
    ];
}

/// What to compose for one crop.
#[derive(Debug, Clone)]
pub struct MaskRequest {
    /// Box padding in percent of the crop dimension: top, right, bottom,
    /// left.
    pub padding: [i32; 4],
    /// Box feather fraction, 0..1.
    pub blur: f32,
    /// Include the learned occlusion matte.
    pub occlusion: bool,
    /// Include the face-parser region mask.
    pub region: bool,
    /// Region classes to union; empty means [`FaceRegion::ALL`].
    pub regions: Vec<FaceRegion>,
}

impl Default for MaskRequest {
    fn default() -> Self {
        Self {
            padding: [0, 0, 0, 0],
            blur: 0.3,
            occlusion: false,
            region: false,
            regions: Vec::new(),
        }
    }
}

/// Mask generator shared by the face processors. Thread-safe; the learned
/// maskers serialise through their sessions.
pub struct MaskComposer {
    occluder: Option<SessionHandle>,
    parser: Option<SessionHandle>,
}

impl MaskComposer {
    /// Loads the learned maskers that `request` needs; a box-only request
    /// loads nothing.
    pub fn new(
        repo: &ModelRepository,
        session_options: &SessionOptions,
        request: &MaskRequest,
    ) -> Result<Self> {
        let registry = SessionRegistry::global();
        let occluder = if request.occlusion {
            Some(registry.get_session(&SessionKey::new(
                repo.resolve(names::FACE_OCCLUDER)?,
                session_options.clone(),
            ))?)
        } else {
            None
        };
        let parser = if request.region {
            Some(registry.get_session(&SessionKey::new(
                repo.resolve(names::FACE_PARSER)?,
                session_options.clone(),
            ))?)
        } else {
            None
        };
        Ok(Self { occluder, parser })
    }

    /// A composer that can only produce box masks.
    #[must_use]
    pub fn box_only() -> Self {
        Self {
            occluder: None,
            parser: None,
        }
    }

    /// Generates and reduces every requested mask for `crop`.
    pub fn compose(&self, crop: &Frame, request: &MaskRequest) -> Result<Array2<f32>> {
        let size = (crop.width() as usize, crop.height() as usize);
        let mut masks = vec![static_box_mask(size, request.blur, request.padding)];

        if request.occlusion {
            if let Some(occluder) = &self.occluder {
                masks.push(self.occlusion_mask(occluder, crop)?);
            }
        }
        if request.region {
            if let Some(parser) = &self.parser {
                let regions: &[FaceRegion] = if request.regions.is_empty() {
                    &FaceRegion::ALL
                } else {
                    &request.regions
                };
                masks.push(self.region_mask(parser, crop, regions)?);
            }
        }

        Ok(reduce_masks(&masks))
    }

    /// Learned matte for occluded face pixels, sized to the crop.
    fn occlusion_mask(&self, session: &SessionHandle, crop: &Frame) -> Result<Array2<f32>> {
        let (in_h, in_w) = occluder_input_size(session);
        let resized = crop.resize(in_w as u32, in_h as u32);

        let input_name = session.input_names().first().map_or("input", String::as_str);
        let outputs = session.run(vec![(input_name, tensor::hwc_input(&resized).into_dyn())])?;

        let out = &outputs[0];
        let (out_h, out_w) = match out.shape.as_slice() {
            [_, h, w, ..] => (*h as usize, *w as usize),
            _ => (in_h, in_w),
        };
        let mut mask = tensor::plane_from_slice(&out.data, out_h, out_w, 0);
        mask.mapv_inplace(|v| v.clamp(0.0, 1.0));

        let mask = resize_plane(&mask, crop.width() as usize, crop.height() as usize);
        Ok(sharpen_learned_mask(&mask))
    }

    /// Union of the requested parser classes, sized to the crop.
    fn region_mask(
        &self,
        session: &SessionHandle,
        crop: &Frame,
        regions: &[FaceRegion],
    ) -> Result<Array2<f32>> {
        let (in_h, in_w) = session.input_hw(0).unwrap_or((512, 512));
        let resized = crop.resize(in_w as u32, in_h as u32);
        let mirrored = mirror_horizontal(&resized);

        let input_name = session.input_names().first().map_or("input", String::as_str);
        let outputs = session.run(vec![(
            input_name,
            tensor::chw_input(&mirrored, [0.5; 3], [0.5; 3]).into_dyn(),
        )])?;

        let out = &outputs[0];
        let (out_h, out_w) = match out.shape.as_slice() {
            [_, _, h, w] => (*h as usize, *w as usize),
            _ => (in_h, in_w),
        };

        let plane_len = out_h * out_w;
        let mut union = Array2::<f32>::zeros((out_h, out_w));
        for region in regions {
            let index = *region as usize;
            if (index + 1) * plane_len > out.data.len() {
                log::warn!("Face parser output has no plane for region {region:?}");
                continue;
            }
            let plane = tensor::plane_from_slice(&out.data, out_h, out_w, index);
            for (u, v) in union.iter_mut().zip(plane.iter()) {
                *u = u.max(v.clamp(0.0, 1.0));
            }
        }

        let union = resize_plane(&union, crop.width() as usize, crop.height() as usize);
        Ok(sharpen_learned_mask(&union))
    }
}

/// Ones with a padded, feathered border.
///
/// Padding is given in percent of the crop dimension per side (top, right,
/// bottom, left); the blur fraction sets both the minimum cleared border
/// and the Gaussian feather width.
#[must_use]
pub fn static_box_mask(size: (usize, usize), blur: f32, padding: [i32; 4]) -> Array2<f32> {
    let (w, h) = size;
    let blur_amount = (w as f32 * 0.5 * blur) as usize;
    let blur_area = blur_amount / 2;

    let pad = |percent: i32, extent: usize| -> usize {
        blur_area.max((extent as f32 * percent.max(0) as f32 / 100.0) as usize)
    };
    let top = pad(padding[0], h).min(h);
    let right = pad(padding[1], w).min(w);
    let bottom = pad(padding[2], h).min(h);
    let left = pad(padding[3], w).min(w);

    let mut mask = Array2::<f32>::ones((h, w));
    for y in 0..h {
        for x in 0..w {
            if y < top || y >= h - bottom || x < left || x >= w - right {
                mask[[y, x]] = 0.0;
            }
        }
    }

    if blur_amount > 0 {
        mask = gaussian_blur(&mask, blur_amount as f32 * 0.25, 0);
    }
    mask
}

/// Element-wise minimum over the component masks, clamped to [0, 1].
#[must_use]
pub fn reduce_masks(masks: &[Array2<f32>]) -> Array2<f32> {
    let mut iter = masks.iter();
    let Some(first) = iter.next() else {
        return Array2::zeros((0, 0));
    };
    let mut out = first.clone();
    for mask in iter {
        debug_assert_eq!(mask.dim(), out.dim(), "component masks must agree in size");
        for (o, v) in out.iter_mut().zip(mask.iter()) {
            *o = o.min(*v);
        }
    }
    out.mapv_inplace(|v| v.clamp(0.0, 1.0));
    out
}

/// Blur, then remap [0.5, 1] onto [0, 1]: a soft learned matte becomes a
/// near-binary alpha with a short feather band.
fn sharpen_learned_mask(mask: &Array2<f32>) -> Array2<f32> {
    let mut out = gaussian_blur(mask, 5.0, 0);
    out.mapv_inplace(|v| (v.max(0.5).min(1.0) - 0.5) * 2.0);
    out
}

/// The occluder takes NHWC input; read its size from the declared dims.
fn occluder_input_size(session: &SessionHandle) -> (usize, usize) {
    if let Some(dims) = session.input_dims().first() {
        if dims.len() == 4 && dims[1] > 0 && dims[2] > 0 {
            return (dims[1] as usize, dims[2] as usize);
        }
    }
    (256, 256)
}

/// The face parser was trained on mirrored crops.
fn mirror_horizontal(frame: &Frame) -> Frame {
    let mut data = frame.data().clone();
    data.invert_axis(ndarray::Axis(1));
    let owned = ndarray::Array3::from_shape_vec(
        data.raw_dim(),
        data.iter().copied().collect(),
    )
    .expect("mirror preserves element count");
    Frame::from_array(owned)
}
