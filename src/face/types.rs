//! Core face records.

use glam::Vec2;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A point set in frame coordinates. Five-point sets stay inline; 68-point
/// sets spill to the heap.
pub type Landmarks = SmallVec<[Vec2; 8]>;

/// A face identity embedding.
pub type Embedding = Vec<f32>;

/// Axis-aligned face bounding box in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl FaceBox {
    #[must_use]
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// A box with no valid extents; marks a [`Face`] as empty.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            x_min: -1.0,
            y_min: -1.0,
            x_max: -1.0,
            y_max: -1.0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x_min < 0.0 || self.y_min < 0.0 || self.x_max <= self.x_min || self.y_max <= self.y_min
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    #[inline]
    #[must_use]
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    #[inline]
    #[must_use]
    pub fn center(&self) -> Vec2 {
        Vec2::new(
            (self.x_min + self.x_max) * 0.5,
            (self.y_min + self.y_max) * 0.5,
        )
    }
}

impl Default for FaceBox {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Race {
    White,
    Black,
    Asian,
    Latino,
    Arabic,
    Indian,
    #[default]
    Unknown,
}

/// Inclusive age bracket estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeRange {
    pub min: u32,
    pub max: u32,
}

impl AgeRange {
    #[must_use]
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// True while no classifier has narrowed the bracket.
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.min == 0 && self.max == 100
    }

    /// True when the bracket overlaps `[lo, hi]`.
    #[must_use]
    pub fn overlaps(&self, lo: u32, hi: u32) -> bool {
        self.min <= hi && self.max >= lo
    }
}

impl Default for AgeRange {
    fn default() -> Self {
        Self { min: 0, max: 100 }
    }
}

/// One analysed face detection.
///
/// Constructed by the analyser, cached by frame fingerprint, and discarded
/// with its cache slot. Fields beyond box/landmark5/score are populated
/// on demand by the requested analysis levels.
#[derive(Debug, Clone, Default)]
pub struct Face {
    pub bounding_box: FaceBox,
    /// Detector 5-point landmarks (eyes, nose tip, mouth corners).
    pub landmark5: Landmarks,
    /// Optional full 68-point set from the landmarker.
    pub landmark68: Landmarks,
    pub detector_score: f32,
    pub landmarker_score: f32,
    pub embedding: Embedding,
    /// L2-normalised counterpart of `embedding`.
    pub normed_embedding: Embedding,
    pub gender: Gender,
    pub age: AgeRange,
    pub race: Race,
}

impl Face {
    /// A face is empty iff its box has invalid extents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bounding_box.is_empty()
    }

    /// The preferred 5-point set: condensed from the 68-point landmarks
    /// when available, otherwise the detector points.
    #[must_use]
    pub fn landmark5_preferred(&self) -> Landmarks {
        if self.landmark68.len() == 68 {
            super::helper::condense_landmark_68_to_5(&self.landmark68)
        } else {
            self.landmark5.clone()
        }
    }

    /// Cosine distance to another face over the normed embeddings; `None`
    /// when either embedding is missing.
    #[must_use]
    pub fn cosine_distance(&self, other: &Face) -> Option<f32> {
        if self.normed_embedding.is_empty()
            || self.normed_embedding.len() != other.normed_embedding.len()
        {
            return None;
        }
        let dot: f32 = self
            .normed_embedding
            .iter()
            .zip(&other.normed_embedding)
            .map(|(a, b)| a * b)
            .sum();
        Some(1.0 - dot)
    }
}
