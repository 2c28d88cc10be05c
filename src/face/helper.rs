//! Face geometry helpers: warp templates, suppression, landmark
//! conversions and rotation bookkeeping for the detector sweep.

use glam::Vec2;

use super::types::{Embedding, FaceBox, Landmarks};

// ============================================================================
// Warp templates
// ============================================================================

/// Canonical 5-point alignment templates, normalised to [0, 1] and scaled
/// by the crop size at use. The constants are part of the model interop
/// contract and must stay bit-exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarpTemplate {
    Arcface112V1,
    Arcface112V2,
    Arcface128V2,
    Ffhq512,
}

impl WarpTemplate {
    #[must_use]
    pub fn points(self) -> [Vec2; 5] {
        match self {
            Self::Arcface112V1 => [
                Vec2::new(0.354_732_14, 0.456_589_29),
                Vec2::new(0.645_267_86, 0.456_589_29),
                Vec2::new(0.500_000_00, 0.611_544_64),
                Vec2::new(0.379_133_93, 0.776_875_00),
                Vec2::new(0.620_866_07, 0.776_875_00),
            ],
            Self::Arcface112V2 => [
                Vec2::new(0.341_916_07, 0.461_574_11),
                Vec2::new(0.656_533_93, 0.459_833_93),
                Vec2::new(0.500_225_00, 0.640_505_36),
                Vec2::new(0.370_975_89, 0.824_691_96),
                Vec2::new(0.631_516_96, 0.823_250_89),
            ],
            Self::Arcface128V2 => [
                Vec2::new(0.361_676_56, 0.403_877_34),
                Vec2::new(0.636_967_19, 0.402_354_69),
                Vec2::new(0.500_196_87, 0.560_442_19),
                Vec2::new(0.387_103_91, 0.721_605_47),
                Vec2::new(0.615_077_34, 0.720_344_53),
            ],
            Self::Ffhq512 => [
                Vec2::new(0.376_916_76, 0.468_646_64),
                Vec2::new(0.622_856_97, 0.469_128_13),
                Vec2::new(0.501_238_59, 0.613_319_04),
                Vec2::new(0.393_088_22, 0.725_411_00),
                Vec2::new(0.611_502_05, 0.724_904_65),
            ],
        }
    }
}

// ============================================================================
// Suppression
// ============================================================================

/// Intersection-over-union of two boxes.
#[must_use]
pub fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x_min.max(b.x_min);
    let y1 = a.y_min.max(b.y_min);
    let x2 = a.x_max.min(b.x_max);
    let y2 = a.y_max.min(b.y_max);
    let overlap = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if overlap == 0.0 {
        return 0.0;
    }
    let union = a.area() + b.area() - overlap;
    overlap / union
}

/// Non-maximum suppression. Returns indices into `boxes` of the survivors,
/// highest score first.
#[must_use]
pub fn apply_nms(boxes: &[FaceBox], scores: &[f32], iou_threshold: f32) -> Vec<usize> {
    debug_assert_eq!(boxes.len(), scores.len());
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut suppressed = vec![false; boxes.len()];
    let mut keep = Vec::new();
    for (rank, &i) in order.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for &j in &order[rank + 1..] {
            if !suppressed[j] && iou(&boxes[i], &boxes[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }
    keep
}

// ============================================================================
// Landmark conversions
// ============================================================================

/// Condenses a 68-point landmark set to the canonical 5 points: eye
/// centres, nose tip and mouth corners.
#[must_use]
pub fn condense_landmark_68_to_5(landmark68: &Landmarks) -> Landmarks {
    debug_assert_eq!(landmark68.len(), 68);
    let eye = |range: std::ops::Range<usize>| {
        let mut sum = Vec2::ZERO;
        for i in range.clone() {
            sum += landmark68[i];
        }
        sum / range.len() as f32
    };
    let mut out = Landmarks::new();
    out.push(eye(36..42)); // left eye
    out.push(eye(42..48)); // right eye
    out.push(landmark68[30]); // nose tip
    out.push(landmark68[48]); // left mouth corner
    out.push(landmark68[54]); // right mouth corner
    out
}

/// Element-wise average of several embeddings of equal length.
#[must_use]
pub fn average_embedding(embeddings: &[Embedding]) -> Embedding {
    let Some(first) = embeddings.first() else {
        return Embedding::new();
    };
    let mut avg = vec![0.0_f32; first.len()];
    for e in embeddings {
        for (a, v) in avg.iter_mut().zip(e) {
            *a += v;
        }
    }
    for a in &mut avg {
        *a /= embeddings.len() as f32;
    }
    avg
}

/// L2-normalises an embedding; zero vectors pass through unchanged.
#[must_use]
pub fn normalize_embedding(embedding: &[f32]) -> Embedding {
    let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return embedding.to_vec();
    }
    embedding.iter().map(|v| v / norm).collect()
}

// ============================================================================
// Rotation sweep bookkeeping
// ============================================================================

/// Maps a point in a frame rotated clockwise by `angle` (multiple of 90)
/// back into original-frame coordinates. `original` is the unrotated
/// `(width, height)`.
#[must_use]
pub fn rotate_point_back(p: Vec2, angle: u32, original: (u32, u32)) -> Vec2 {
    let (w, h) = (original.0 as f32, original.1 as f32);
    match angle % 360 {
        90 => Vec2::new(p.y, h - 1.0 - p.x),
        180 => Vec2::new(w - 1.0 - p.x, h - 1.0 - p.y),
        270 => Vec2::new(w - 1.0 - p.y, p.x),
        _ => p,
    }
}

/// Maps a point in original-frame coordinates into the frame rotated
/// clockwise by `angle`. Inverse of [`rotate_point_back`].
#[must_use]
pub fn rotate_point_forward(p: Vec2, angle: u32, original: (u32, u32)) -> Vec2 {
    let (w, h) = (original.0 as f32, original.1 as f32);
    match angle % 360 {
        90 => Vec2::new(h - 1.0 - p.y, p.x),
        180 => Vec2::new(w - 1.0 - p.x, h - 1.0 - p.y),
        270 => Vec2::new(p.y, w - 1.0 - p.x),
        _ => p,
    }
}

/// Maps a box in original coordinates into the rotated frame.
#[must_use]
pub fn rotate_box_forward(bbox: &FaceBox, angle: u32, original: (u32, u32)) -> FaceBox {
    if angle % 360 == 0 {
        return *bbox;
    }
    let a = rotate_point_forward(Vec2::new(bbox.x_min, bbox.y_min), angle, original);
    let b = rotate_point_forward(Vec2::new(bbox.x_max, bbox.y_max), angle, original);
    FaceBox::new(a.x.min(b.x), a.y.min(b.y), a.x.max(b.x), a.y.max(b.y))
}

/// Maps a box detected in a rotated frame back to original coordinates.
#[must_use]
pub fn rotate_box_back(bbox: &FaceBox, angle: u32, original: (u32, u32)) -> FaceBox {
    if angle % 360 == 0 {
        return *bbox;
    }
    let a = rotate_point_back(Vec2::new(bbox.x_min, bbox.y_min), angle, original);
    let b = rotate_point_back(Vec2::new(bbox.x_max, bbox.y_max), angle, original);
    FaceBox::new(a.x.min(b.x), a.y.min(b.y), a.x.max(b.x), a.y.max(b.y))
}

/// Maps a landmark set detected in a rotated frame back to original
/// coordinates.
#[must_use]
pub fn rotate_landmarks_back(landmarks: &Landmarks, angle: u32, original: (u32, u32)) -> Landmarks {
    landmarks
        .iter()
        .map(|p| rotate_point_back(*p, angle, original))
        .collect()
}
