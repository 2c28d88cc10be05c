//! Face analyser: the one entry point for per-frame face intelligence.
//!
//! # Protocol
//!
//! 1. Consult the [`FaceStore`] by frame fingerprint; return cached faces
//!    when they already cover the requested analysis levels.
//! 2. Otherwise detect, sweeping frame rotations 0/90/180/270 clockwise
//!    until the detector scores a face, and remember the winning angle.
//! 3. Suppress overlapping boxes (0.4 IoU single-detector, 0.1 when
//!    fusing several).
//! 4. Enrich each kept box with the requested levels: 68-point landmarks
//!    (rotation retry, then 5-to-68 expansion as terminal fallback),
//!    embedding, gender/age/race.
//! 5. Merge with same-shape cached faces so previously computed attributes
//!    survive, then upgrade the cache slot in place.
//!
//! A frame with no detectable face caches an empty list; downstream
//! processors treat that as a no-op.

use std::sync::Arc;

use bitflags::bitflags;

use crate::config::{FaceAnalysisConfig, FaceDetectorConfig};
use crate::errors::Result;
use crate::inference::SessionOptions;
use crate::models::ModelRepository;
use crate::vision::Frame;

use super::classifier::FaceClassifier;
use super::detector::{Detection, FaceDetector};
use super::helper;
use super::landmarker::FaceLandmarker;
use super::recognizer::FaceRecognizer;
use super::selector::FaceSelectorOptions;
use super::store::FaceStore;
use super::types::{Face, Gender, Landmarks};

bitflags! {
    /// Requested analysis levels.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaceAnalysis: u8 {
        const DETECTION  = 0b0001;
        const LANDMARK   = 0b0010;
        const EMBEDDING  = 0b0100;
        const GENDER_AGE = 0b1000;
    }
}

/// Analyser construction options.
#[derive(Debug, Clone)]
pub struct FaceAnalyserOptions {
    pub detector: FaceDetectorConfig,
    /// Minimum landmarker confidence before the rotation retry kicks in.
    pub landmarker_score_threshold: f32,
    pub session: SessionOptions,
}

impl FaceAnalyserOptions {
    #[must_use]
    pub fn from_config(config: &FaceAnalysisConfig, session: SessionOptions) -> Self {
        Self {
            detector: config.face_detector.clone(),
            landmarker_score_threshold: 0.5,
            session,
        }
    }
}

const SWEEP_ANGLES: [u32; 4] = [0, 90, 180, 270];

pub struct FaceAnalyser {
    detector: FaceDetector,
    landmarker: FaceLandmarker,
    recognizer: FaceRecognizer,
    classifier: FaceClassifier,
    store: Arc<FaceStore>,
    options: FaceAnalyserOptions,
}

impl FaceAnalyser {
    /// Loads the sub-models through the session registry.
    pub fn new(
        repo: &ModelRepository,
        options: FaceAnalyserOptions,
        store: Arc<FaceStore>,
    ) -> Result<Self> {
        Ok(Self {
            detector: FaceDetector::new(repo, &options.session, &options.detector)?,
            landmarker: FaceLandmarker::new(repo, &options.session)?,
            recognizer: FaceRecognizer::new(repo, &options.session)?,
            classifier: FaceClassifier::new(repo, &options.session)?,
            store,
            options,
        })
    }

    #[must_use]
    pub fn store(&self) -> &Arc<FaceStore> {
        &self.store
    }

    /// Returns every face in the frame at the requested analysis levels,
    /// unfiltered. Results are cached by frame fingerprint and upgraded in
    /// place when a later call requests more.
    pub fn get_many_faces(&self, frame: &Frame, analysis: FaceAnalysis) -> Result<Vec<Face>> {
        if frame.is_empty() {
            log::warn!("Face analyser received an empty frame");
            return Ok(Vec::new());
        }

        let cached = self.store.frame_faces(frame);
        if let Some(cached_faces) = &cached {
            if cache_satisfies(cached_faces, analysis) {
                log::debug!("Face cache hit ({} faces)", cached_faces.len());
                return Ok(cached_faces.clone());
            }
        }

        // reuse cached boxes instead of re-detecting when only enrichment
        // is missing
        let (detections, detected_angle) = if let Some(cached_faces) = &cached {
            let recovered: Vec<Detection> = cached_faces
                .iter()
                .map(|f| Detection {
                    bounding_box: f.bounding_box,
                    landmark5: f.landmark5.clone(),
                    score: f.detector_score,
                })
                .collect();
            (recovered, 0)
        } else {
            self.detect_with_rotation_sweep(frame)?
        };

        if detections.is_empty() {
            self.store.insert_frame_faces(frame, Vec::new());
            return Ok(Vec::new());
        }

        let mut faces = self.create_faces(frame, &detections, detected_angle, analysis)?;

        // merge: keep attributes the cached generation already computed
        if let Some(cached_faces) = cached {
            if cached_faces.len() == faces.len() {
                for (face, old) in faces.iter_mut().zip(&cached_faces) {
                    if face.embedding.is_empty() && !old.embedding.is_empty() {
                        face.embedding = old.embedding.clone();
                        face.normed_embedding = old.normed_embedding.clone();
                    }
                    if face.landmark68.is_empty() && !old.landmark68.is_empty() {
                        face.landmark68 = old.landmark68.clone();
                        face.landmarker_score = old.landmarker_score;
                    }
                    if face.gender == Gender::Unknown && old.gender != Gender::Unknown {
                        face.gender = old.gender;
                        face.age = old.age;
                        face.race = old.race;
                    }
                }
            }
        }

        self.store.insert_frame_faces(frame, faces.clone());
        Ok(faces)
    }

    /// Analyses and then applies the step's selector.
    pub fn get_faces(
        &self,
        frame: &Frame,
        analysis: FaceAnalysis,
        selector: &FaceSelectorOptions,
    ) -> Result<Vec<Face>> {
        let faces = self.get_many_faces(frame, analysis)?;
        Ok(selector.select(faces))
    }

    /// The face at `position` in selector order, if any.
    pub fn get_one_face(
        &self,
        frame: &Frame,
        analysis: FaceAnalysis,
        position: usize,
    ) -> Result<Option<Face>> {
        let faces = self.get_many_faces(frame, analysis)?;
        if faces.is_empty() {
            return Ok(None);
        }
        let index = position.min(faces.len() - 1);
        Ok(Some(faces[index].clone()))
    }

    /// Builds the average source face over several frames: the first
    /// detected face carries the record, with its embedding replaced by the
    /// element-wise average over all detected faces.
    pub fn get_average_face(&self, frames: &[Frame]) -> Result<Option<Face>> {
        let analysis = FaceAnalysis::DETECTION | FaceAnalysis::LANDMARK | FaceAnalysis::EMBEDDING;
        let mut all = Vec::new();
        for frame in frames {
            let faces = self.get_many_faces(frame, analysis)?;
            if let Some(face) = faces.into_iter().find(|f| !f.is_empty()) {
                all.push(face);
            }
        }
        let Some(mut average) = all.first().cloned() else {
            return Ok(None);
        };
        if all.len() > 1 {
            let embeddings: Vec<_> = all.iter().map(|f| f.embedding.clone()).collect();
            average.embedding = helper::average_embedding(&embeddings);
            average.normed_embedding = helper::normalize_embedding(&average.embedding);
        }
        Ok(Some(average))
    }

    /// Faces in `frame` whose cosine distance to any reference face is
    /// below `distance`.
    pub fn find_similar_faces(
        &self,
        references: &[Face],
        frame: &Frame,
        distance: f32,
    ) -> Result<Vec<Face>> {
        let analysis = FaceAnalysis::DETECTION | FaceAnalysis::LANDMARK | FaceAnalysis::EMBEDDING;
        let candidates = self.get_many_faces(frame, analysis)?;
        Ok(candidates
            .into_iter()
            .filter(|candidate| {
                references.iter().any(|reference| {
                    candidate
                        .cosine_distance(reference)
                        .is_some_and(|d| d < distance)
                })
            })
            .collect())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn detect_with_rotation_sweep(&self, frame: &Frame) -> Result<(Vec<Detection>, u32)> {
        for angle in SWEEP_ANGLES {
            let rotated;
            let target = if angle == 0 {
                frame
            } else {
                rotated = frame.rotate_90n(angle);
                &rotated
            };
            let detections = self.detector.detect(target)?;
            if !detections.is_empty() {
                log::debug!("Detected {} face(s) at rotation {angle}", detections.len());
                return Ok((detections, angle));
            }
        }
        Ok((Vec::new(), 0))
    }

    fn create_faces(
        &self,
        frame: &Frame,
        detections: &[Detection],
        detected_angle: u32,
        analysis: FaceAnalysis,
    ) -> Result<Vec<Face>> {
        let original_size = (frame.width(), frame.height());
        let boxes: Vec<_> = detections.iter().map(|d| d.bounding_box).collect();
        let scores: Vec<_> = detections.iter().map(|d| d.score).collect();
        let keep = helper::apply_nms(&boxes, &scores, self.detector.effective_iou_threshold());

        let mut faces = Vec::with_capacity(keep.len());
        for index in keep {
            let detection = &detections[index];
            let mut face = Face {
                bounding_box: helper::rotate_box_back(
                    &detection.bounding_box,
                    detected_angle,
                    original_size,
                ),
                landmark5: helper::rotate_landmarks_back(
                    &detection.landmark5,
                    detected_angle,
                    original_size,
                ),
                detector_score: detection.score,
                ..Face::default()
            };

            if analysis.contains(FaceAnalysis::LANDMARK) {
                self.attach_landmark68(frame, &mut face, detected_angle, &detection.bounding_box)?;
            }

            let landmark5 = face.landmark5_preferred();
            if analysis.contains(FaceAnalysis::EMBEDDING) {
                let (embedding, normed) = self.recognizer.embed(frame, &landmark5)?;
                face.embedding = embedding;
                face.normed_embedding = normed;
            }
            if analysis.contains(FaceAnalysis::GENDER_AGE) {
                let class = self.classifier.classify(frame, &landmark5)?;
                face.gender = class.gender;
                face.age = class.age;
                face.race = class.race;
            }

            faces.push(face);
        }
        Ok(faces)
    }

    /// Runs the landmarker at the detection angle, retries the remaining
    /// rotations when the confidence is too low, and finally falls back to
    /// expanding 68 points from the detector's 5.
    fn attach_landmark68(
        &self,
        frame: &Frame,
        face: &mut Face,
        detected_angle: u32,
        rotated_box: &super::types::FaceBox,
    ) -> Result<()> {
        let original_size = (frame.width(), frame.height());
        let threshold = self.options.landmarker_score_threshold;

        let mut best: Option<(Landmarks, f32)> = None;
        for angle in std::iter::once(detected_angle)
            .chain(SWEEP_ANGLES.iter().copied().filter(|a| *a != detected_angle))
        {
            let rotated;
            let target = if angle == 0 {
                frame
            } else {
                rotated = frame.rotate_90n(angle);
                &rotated
            };
            let target_box = if angle == detected_angle {
                *rotated_box
            } else {
                helper::rotate_box_forward(&face.bounding_box, angle, original_size)
            };

            let result = self.landmarker.detect(target, &target_box)?;
            let landmarks =
                helper::rotate_landmarks_back(&result.landmark68, angle, original_size);
            if result.score > threshold {
                face.landmark68 = landmarks;
                face.landmarker_score = result.score;
                return Ok(());
            }
            if best.as_ref().is_none_or(|(_, s)| result.score > *s) {
                best = Some((landmarks, result.score));
            }
        }

        // terminal fallback: synthesise from the 5-point set
        match self.landmarker.expand_68_from_5(&face.landmark5) {
            Ok(expanded) => {
                face.landmark68 = expanded;
                face.landmarker_score = 1.0;
            }
            Err(err) => {
                log::warn!("68-from-5 expansion failed: {err}");
                if let Some((landmarks, score)) = best {
                    face.landmark68 = landmarks;
                    face.landmarker_score = score;
                }
            }
        }
        Ok(())
    }
}

fn cache_satisfies(faces: &[Face], analysis: FaceAnalysis) -> bool {
    let Some(face) = faces.first() else {
        // an empty result is a complete answer at every level
        return true;
    };
    if analysis.contains(FaceAnalysis::EMBEDDING) && face.embedding.is_empty() {
        return false;
    }
    if analysis.contains(FaceAnalysis::LANDMARK) && face.landmark68.is_empty() {
        return false;
    }
    if analysis.contains(FaceAnalysis::GENDER_AGE) && face.age.is_unset() {
        return false;
    }
    true
}
