//! FairFace gender / age / race classification.

use crate::errors::Result;
use crate::inference::{SessionHandle, SessionKey, SessionOptions, SessionRegistry};
use crate::models::{names, ModelRepository};
use crate::vision::{tensor, warp, Frame};

use super::helper::WarpTemplate;
use super::types::{AgeRange, Gender, Landmarks, Race};

const CROP_SIZE: u32 = 224;

/// A gender/age/race estimate for one face.
#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub gender: Gender,
    pub age: AgeRange,
    pub race: Race,
}

pub struct FaceClassifier {
    session: SessionHandle,
}

impl FaceClassifier {
    pub fn new(repo: &ModelRepository, session_options: &SessionOptions) -> Result<Self> {
        let session = SessionRegistry::global().get_session(&SessionKey::new(
            repo.resolve(names::CLASSIFIER_FAIRFACE)?,
            session_options.clone(),
        ))?;
        Ok(Self { session })
    }

    /// Classifies the face at `landmark5` within `frame`.
    pub fn classify(&self, frame: &Frame, landmark5: &Landmarks) -> Result<Classification> {
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
            tensor::chw_input(&crop, IMAGENET_MEAN, IMAGENET_STD).into_dyn(),
        )])?;

        // single concatenated head: 7 race logits, 2 gender logits, 9 age
        // bracket logits
        let logits = &outputs[0].data;
        if logits.len() < 18 {
            return Ok(Classification {
                gender: Gender::Unknown,
                age: AgeRange::default(),
                race: Race::Unknown,
            });
        }
        let race_idx = argmax(&logits[0..7]);
        let gender_idx = argmax(&logits[7..9]);
        let age_idx = argmax(&logits[9..18]);

        Ok(Classification {
            gender: match gender_idx {
                0 => Gender::Male,
                _ => Gender::Female,
            },
            age: AGE_BRACKETS[age_idx],
            race: RACES[race_idx],
        })
    }
}

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

// FairFace label order; East and Southeast Asian collapse onto `Asian`,
// Middle Eastern onto `Arabic`.
const RACES: [Race; 7] = [
    Race::White,
    Race::Black,
    Race::Latino,
    Race::Asian,
    Race::Asian,
    Race::Indian,
    Race::Arabic,
];

const AGE_BRACKETS: [AgeRange; 9] = [
    AgeRange { min: 0, max: 2 },
    AgeRange { min: 3, max: 9 },
    AgeRange { min: 10, max: 19 },
    AgeRange { min: 20, max: 29 },
    AgeRange { min: 30, max: 39 },
    AgeRange { min: 40, max: 49 },
    AgeRange { min: 50, max: 59 },
    AgeRange { min: 60, max: 69 },
    AgeRange { min: 70, max: 100 },
];

fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}
