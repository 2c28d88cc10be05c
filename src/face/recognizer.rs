//! ArcFace identity embedding.

use crate::errors::Result;
use crate::inference::{SessionHandle, SessionKey, SessionOptions, SessionRegistry};
use crate::models::{names, ModelRepository};
use crate::vision::{tensor, warp, Frame};

use super::helper::{normalize_embedding, WarpTemplate};
use super::types::{Embedding, Landmarks};

const CROP_SIZE: u32 = 112;

pub struct FaceRecognizer {
    session: SessionHandle,
}

impl FaceRecognizer {
    pub fn new(repo: &ModelRepository, session_options: &SessionOptions) -> Result<Self> {
        let session = SessionRegistry::global().get_session(&SessionKey::new(
            repo.resolve(names::RECOGNIZER_ARCFACE)?,
            session_options.clone(),
        ))?;
        Ok(Self { session })
    }

    /// Embeds the face at `landmark5` within `frame`.
    ///
    /// Returns the raw embedding and its L2-normalised counterpart.
    pub fn embed(&self, frame: &Frame, landmark5: &Landmarks) -> Result<(Embedding, Embedding)> {
        let transform = warp::estimate_from_landmarks(
            landmark5.as_slice(),
            &WarpTemplate::Arcface112V2.points(),
            (CROP_SIZE, CROP_SIZE),
        );
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
            tensor::chw_input(&crop, [0.5; 3], [0.5; 3]).into_dyn(),
        )])?;

        let embedding = outputs[0].data.clone();
        let normed = normalize_embedding(&embedding);
        Ok((embedding, normed))
    }
}
