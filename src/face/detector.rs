//! Face detection backends.
//!
//! Three detector families share one preprocessing contract (letterboxed
//! square input, `(px - 127.5) / 128` RGB planes) and emit the same
//! [`Detection`] records: a box, a 5-point landmark set and a confidence.
//! The `Many` mode runs every backend and lets the analyser fuse the
//! results under a tight NMS threshold.

use ndarray::Array3;

use crate::config::{DetectorType, FaceDetectorConfig};
use crate::errors::Result;
use crate::inference::{SessionHandle, SessionKey, SessionOptions, SessionRegistry};
use crate::models::{names, ModelRepository};
use crate::vision::{tensor, Frame};

use super::types::{FaceBox, Landmarks};

/// One raw detector hit, in original-frame coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bounding_box: FaceBox,
    pub landmark5: Landmarks,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Yolo,
    Scrfd,
    Retina,
}

impl Backend {
    fn model_name(self) -> &'static str {
        match self {
            Self::Yolo => names::DETECTOR_YOLO,
            Self::Scrfd => names::DETECTOR_SCRFD,
            Self::Retina => names::DETECTOR_RETINA,
        }
    }
}

/// Configured face detector; thread-safe, sessions shared via the registry.
pub struct FaceDetector {
    backends: Vec<(Backend, SessionHandle)>,
    detector_type: DetectorType,
    size: u32,
    score_threshold: f32,
    iou_threshold: f32,
}

impl FaceDetector {
    pub fn new(
        repo: &ModelRepository,
        session_options: &SessionOptions,
        config: &FaceDetectorConfig,
    ) -> Result<Self> {
        let wanted: &[Backend] = match config.detector_type {
            DetectorType::Yolo => &[Backend::Yolo],
            DetectorType::Scrfd => &[Backend::Scrfd],
            DetectorType::RetinaFace => &[Backend::Retina],
            DetectorType::Many => &[Backend::Yolo, Backend::Scrfd, Backend::Retina],
        };

        let registry = SessionRegistry::global();
        let mut backends = Vec::with_capacity(wanted.len());
        for backend in wanted {
            let path = repo.resolve(backend.model_name())?;
            let key = SessionKey::new(path, session_options.clone());
            backends.push((*backend, registry.get_session(&key)?));
        }

        Ok(Self {
            backends,
            detector_type: config.detector_type,
            size: config.size,
            score_threshold: config.score_threshold,
            iou_threshold: config.iou_threshold,
        })
    }

    /// NMS threshold the analyser should suppress with: the configured
    /// value for a single detector, a tight 0.1 when fusing several.
    #[must_use]
    pub fn effective_iou_threshold(&self) -> f32 {
        if self.detector_type == DetectorType::Many {
            0.1
        } else {
            self.iou_threshold
        }
    }

    #[must_use]
    pub fn score_threshold(&self) -> f32 {
        self.score_threshold
    }

    /// Runs detection on a frame, returning hits above the score
    /// threshold. No suppression is applied here.
    pub fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        let prepared = self.prepare(frame);
        let mut detections = Vec::new();
        for (backend, session) in &self.backends {
            let input_name = session
                .input_names()
                .first()
                .map_or("input", String::as_str);
            let outputs = session.run(vec![(
                input_name,
                tensor::chw_input(&prepared.canvas, DETECT_MEAN, DETECT_STD).into_dyn(),
            )])?;

            let decoded = match backend {
                Backend::Yolo => self.decode_yolo(&outputs, &prepared),
                Backend::Scrfd | Backend::Retina => self.decode_anchor(&outputs, &prepared),
            };
            detections.extend(decoded);
        }
        Ok(detections)
    }

    fn prepare(&self, frame: &Frame) -> Prepared {
        let size = self.size;
        let scale = f64::from(size) / f64::from(frame.width().max(frame.height()));
        let scale = scale.min(1.0);
        let scaled_w = (f64::from(frame.width()) * scale).round().max(1.0) as u32;
        let scaled_h = (f64::from(frame.height()) * scale).round().max(1.0) as u32;
        let resized = frame.resize(scaled_w, scaled_h);

        // letterbox into the square detector canvas, top-left anchored
        let mut canvas = Array3::<u8>::zeros((size as usize, size as usize, 3));
        let data = resized.data();
        for y in 0..scaled_h as usize {
            for x in 0..scaled_w as usize {
                for c in 0..3 {
                    canvas[[y, x, c]] = data[[y, x, c]];
                }
            }
        }
        Prepared {
            canvas: Frame::from_array(canvas),
            ratio_w: frame.width() as f32 / scaled_w as f32,
            ratio_h: frame.height() as f32 / scaled_h as f32,
        }
    }

    /// YOLO-face head: `[1, 20, A]` — 4 box values (cx, cy, w, h), one
    /// confidence, then five (x, y, visibility) keypoint triples.
    fn decode_yolo(
        &self,
        outputs: &[crate::inference::TensorOutput],
        prepared: &Prepared,
    ) -> Vec<Detection> {
        let Some(out) = outputs.first() else {
            return Vec::new();
        };
        if out.shape.len() != 3 || out.shape[1] < 20 {
            log::warn!("Unexpected yolo output shape {:?}", out.shape);
            return Vec::new();
        }
        let anchors = out.shape[2] as usize;
        let at = |row: usize, i: usize| out.data[row * anchors + i];

        let mut detections = Vec::new();
        for i in 0..anchors {
            let score = at(4, i);
            if score < self.score_threshold {
                continue;
            }
            let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
            let bounding_box = FaceBox::new(
                (cx - w * 0.5) * prepared.ratio_w,
                (cy - h * 0.5) * prepared.ratio_h,
                (cx + w * 0.5) * prepared.ratio_w,
                (cy + h * 0.5) * prepared.ratio_h,
            );
            let mut landmark5 = Landmarks::new();
            for k in 0..5 {
                landmark5.push(glam::Vec2::new(
                    at(5 + k * 3, i) * prepared.ratio_w,
                    at(5 + k * 3 + 1, i) * prepared.ratio_h,
                ));
            }
            detections.push(Detection {
                bounding_box,
                landmark5,
                score,
            });
        }
        detections
    }

    /// SCRFD / RetinaFace head: per stride in {8, 16, 32}, a score tensor
    /// `[N, 1]`, box distances `[N, 4]` and keypoint offsets `[N, 10]`,
    /// all in stride units around dense two-anchor grid points.
    fn decode_anchor(
        &self,
        outputs: &[crate::inference::TensorOutput],
        prepared: &Prepared,
    ) -> Vec<Detection> {
        const STRIDES: [usize; 3] = [8, 16, 32];
        const ANCHORS_PER_CELL: usize = 2;
        if outputs.len() < 9 {
            log::warn!("Expected 9 detector outputs, got {}", outputs.len());
            return Vec::new();
        }

        let mut detections = Vec::new();
        for (index, &stride) in STRIDES.iter().enumerate() {
            let scores = &outputs[index];
            let boxes = &outputs[index + 3];
            let kps = &outputs[index + 6];

            let grid = self.size as usize / stride;
            let count = scores
                .data
                .len()
                .min(boxes.data.len() / 4)
                .min(kps.data.len() / 10);
            for i in 0..count {
                let score = scores.data[i];
                if score < self.score_threshold {
                    continue;
                }
                let cell = i / ANCHORS_PER_CELL;
                let ax = ((cell % grid) * stride) as f32;
                let ay = ((cell / grid) * stride) as f32;

                let d = |j: usize| boxes.data[i * 4 + j] * stride as f32;
                let bounding_box = FaceBox::new(
                    (ax - d(0)) * prepared.ratio_w,
                    (ay - d(1)) * prepared.ratio_h,
                    (ax + d(2)) * prepared.ratio_w,
                    (ay + d(3)) * prepared.ratio_h,
                );

                let mut landmark5 = Landmarks::new();
                for k in 0..5 {
                    landmark5.push(glam::Vec2::new(
                        (ax + kps.data[i * 10 + k * 2] * stride as f32) * prepared.ratio_w,
                        (ay + kps.data[i * 10 + k * 2 + 1] * stride as f32) * prepared.ratio_h,
                    ));
                }
                detections.push(Detection {
                    bounding_box,
                    landmark5,
                    score,
                });
            }
        }
        detections
    }
}

struct Prepared {
    canvas: Frame,
    ratio_w: f32,
    ratio_h: f32,
}

// (px - 127.5) / 128 expressed over unit-scaled channels
const DETECT_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
const DETECT_STD: [f32; 3] = [128.0 / 255.0, 128.0 / 255.0, 128.0 / 255.0];
