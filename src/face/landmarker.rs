//! 68-point face landmarking.
//!
//! The primary path runs a 2DFAN-style heatmap model on a box-centred crop.
//! When no confident result is available the analyser falls back to
//! [`expand_68_from_5`], a small model that synthesises a 68-point set from
//! the detector's 5 points; the expander is an internal helper, not a
//! selectable landmarker.

use glam::{Affine2, Vec2};

use crate::errors::Result;
use crate::inference::{SessionHandle, SessionKey, SessionOptions, SessionRegistry};
use crate::models::{names, ModelRepository};
use crate::vision::{tensor, warp, Frame};

use super::helper::WarpTemplate;
use super::types::{FaceBox, Landmarks};

const CROP_SIZE: u32 = 256;
const HEATMAP_EXTENT: f32 = 64.0;

/// A landmarking result with the model's confidence.
#[derive(Debug, Clone)]
pub struct LandmarkResult {
    pub landmark68: Landmarks,
    pub score: f32,
}

pub struct FaceLandmarker {
    session: SessionHandle,
    expander: SessionHandle,
}

impl FaceLandmarker {
    pub fn new(repo: &ModelRepository, session_options: &SessionOptions) -> Result<Self> {
        let registry = SessionRegistry::global();
        let session = registry.get_session(&SessionKey::new(
            repo.resolve(names::LANDMARKER_2DFAN)?,
            session_options.clone(),
        ))?;
        let expander = registry.get_session(&SessionKey::new(
            repo.resolve(names::LANDMARKER_68_BY_5)?,
            session_options.clone(),
        ))?;
        Ok(Self { session, expander })
    }

    /// Runs the 68-point model on the face box within `frame`.
    ///
    /// Landmarks come back in `frame` coordinates; the score is the mean
    /// heatmap peak, in [0, 1].
    pub fn detect(&self, frame: &Frame, bounding_box: &FaceBox) -> Result<LandmarkResult> {
        // centre the box in a fixed-scale square crop
        let extent = bounding_box.width().max(bounding_box.height()).max(1.0);
        let scale = 195.0 / extent;
        let center = bounding_box.center();
        let translation = Vec2::new(
            (CROP_SIZE as f32 - center.x * scale * 2.0) * 0.5,
            (CROP_SIZE as f32 - center.y * scale * 2.0) * 0.5,
        );
        let transform =
            Affine2::from_scale_angle_translation(Vec2::splat(scale), 0.0, translation);
        let crop = warp::warp_frame(
            frame,
            transform,
            (CROP_SIZE, CROP_SIZE),
            warp::Border::Replicate,
        );

        let input_name = self
            .session
            .input_names()
            .first()
            .map_or("input", String::as_str);
        let outputs = self.session.run(vec![(
            input_name,
            tensor::chw_input(&crop, [0.0; 3], [1.0; 3]).into_dyn(),
        )])?;

        // output 0: [1, 68, 2..3] landmark coordinates in heatmap units
        let landmarks_out = &outputs[0];
        let cols = if landmarks_out.shape.len() == 3 {
            landmarks_out.shape[2] as usize
        } else {
            2
        };
        if landmarks_out.data.len() < 68 * cols {
            return Err(crate::errors::VisageError::TensorShapeMismatch {
                context: "face_landmarker".into(),
                expected: format!("[1, 68, {cols}]"),
                actual: format!("{:?}", landmarks_out.shape),
            });
        }
        let inverse = transform.inverse();
        let mut landmark68 = Landmarks::new();
        for i in 0..68 {
            let x = landmarks_out.data[i * cols] / HEATMAP_EXTENT * CROP_SIZE as f32;
            let y = landmarks_out.data[i * cols + 1] / HEATMAP_EXTENT * CROP_SIZE as f32;
            landmark68.push(inverse.transform_point2(Vec2::new(x, y)));
        }

        // output 1, when present: [1, 68, H, W] heatmaps; confidence is the
        // mean per-point peak
        let score = outputs.get(1).map_or(1.0, |heatmap| {
            if heatmap.shape.len() != 4 {
                return 1.0;
            }
            let per_point = (heatmap.shape[2] * heatmap.shape[3]) as usize;
            let mut total = 0.0_f32;
            for i in 0..68 {
                let slice = &heatmap.data[i * per_point..(i + 1) * per_point];
                total += slice.iter().copied().fold(f32::MIN, f32::max);
            }
            (total / 68.0).clamp(0.0, 1.0)
        });

        Ok(LandmarkResult { landmark68, score })
    }

    /// Synthesises a 68-point set from 5 landmarks.
    ///
    /// The 5 points are aligned onto the FFHQ template in a unit square,
    /// expanded by the model, then mapped back to frame coordinates.
    pub fn expand_68_from_5(&self, landmark5: &Landmarks) -> Result<Landmarks> {
        let transform = warp::estimate_from_landmarks(
            landmark5.as_slice(),
            &WarpTemplate::Ffhq512.points(),
            (1, 1),
        );

        let normalised = warp::transform_points(landmark5.as_slice(), transform);
        let mut input = ndarray::Array3::<f32>::zeros((1, 5, 2));
        for (i, p) in normalised.iter().enumerate() {
            input[[0, i, 0]] = p.x;
            input[[0, i, 1]] = p.y;
        }

        let input_name = self
            .expander
            .input_names()
            .first()
            .map_or("input", String::as_str);
        let outputs = self.expander.run(vec![(input_name, input.into_dyn())])?;

        let out = &outputs[0];
        let inverse = transform.inverse();
        let mut landmark68 = Landmarks::new();
        for i in 0..68 {
            let p = Vec2::new(out.data[i * 2], out.data[i * 2 + 1]);
            landmark68.push(inverse.transform_point2(p));
        }
        Ok(landmark68)
    }
}
