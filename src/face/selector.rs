//! Face selection: ordering and filtering of analysed faces per step
//! configuration.

use crate::config::{FaceSelectorConfig, GenderFilter, RaceFilter, SelectorMode, SelectorOrder};

use super::types::{Face, Gender, Race};

/// Runtime selector: the configured filters plus the resolved reference
/// face for `Reference` mode.
#[derive(Debug, Clone, Default)]
pub struct FaceSelectorOptions {
    pub config: FaceSelectorConfig,
    /// Reference face with a populated normed embedding; required in
    /// `Reference` mode.
    pub reference: Option<Face>,
    /// Cosine distance cutoff for `Reference` mode.
    pub similarity_threshold: f32,
}

impl FaceSelectorOptions {
    /// Applies order, attribute filters and mode selection.
    #[must_use]
    pub fn select(&self, faces: Vec<Face>) -> Vec<Face> {
        let mut faces = sort_by_order(faces, self.config.order);
        faces = filter_by_age(faces, self.config.age_range.0, self.config.age_range.1);
        faces = filter_by_gender(faces, self.config.gender);
        faces = filter_by_race(faces, self.config.race);

        match self.config.mode {
            SelectorMode::Many => faces,
            SelectorMode::One => {
                if faces.is_empty() {
                    return faces;
                }
                let position = (self.config.position as usize).min(faces.len() - 1);
                vec![faces.swap_remove(position)]
            }
            SelectorMode::Reference => {
                let Some(reference) = &self.reference else {
                    log::warn!("Reference selector mode without a reference face");
                    return Vec::new();
                };
                faces
                    .into_iter()
                    .filter(|face| {
                        face.cosine_distance(reference)
                            .is_some_and(|d| d < self.similarity_threshold)
                    })
                    .collect()
            }
        }
    }
}

/// Sorts faces by the configured spatial or quality order.
#[must_use]
pub fn sort_by_order(mut faces: Vec<Face>, order: SelectorOrder) -> Vec<Face> {
    let key = |face: &Face| -> f32 {
        match order {
            SelectorOrder::LeftRight | SelectorOrder::RightLeft => face.bounding_box.x_min,
            SelectorOrder::TopBottom | SelectorOrder::BottomTop => face.bounding_box.y_min,
            SelectorOrder::SmallLarge | SelectorOrder::LargeSmall => face.bounding_box.area(),
            SelectorOrder::BestWorst | SelectorOrder::WorstBest => face.detector_score,
        }
    };
    let descending = matches!(
        order,
        SelectorOrder::RightLeft
            | SelectorOrder::BottomTop
            | SelectorOrder::LargeSmall
            | SelectorOrder::BestWorst
    );
    faces.sort_by(|a, b| {
        let ord = key(a)
            .partial_cmp(&key(b))
            .unwrap_or(std::cmp::Ordering::Equal);
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });
    faces
}

/// Keeps faces whose age bracket overlaps `[start, end]`. Unclassified
/// faces always pass.
#[must_use]
pub fn filter_by_age(faces: Vec<Face>, start: u32, end: u32) -> Vec<Face> {
    faces
        .into_iter()
        .filter(|f| f.age.is_unset() || f.age.overlaps(start, end))
        .collect()
}

#[must_use]
pub fn filter_by_gender(faces: Vec<Face>, filter: GenderFilter) -> Vec<Face> {
    let wanted = match filter {
        GenderFilter::All => return faces,
        GenderFilter::Male => Gender::Male,
        GenderFilter::Female => Gender::Female,
    };
    faces
        .into_iter()
        .filter(|f| f.gender == wanted || f.gender == Gender::Unknown)
        .collect()
}

#[must_use]
pub fn filter_by_race(faces: Vec<Face>, filter: RaceFilter) -> Vec<Face> {
    let wanted = match filter {
        RaceFilter::All => return faces,
        RaceFilter::White => Race::White,
        RaceFilter::Black => Race::Black,
        RaceFilter::Asian => Race::Asian,
        RaceFilter::Latino => Race::Latino,
        RaceFilter::Arabic => Race::Arabic,
        RaceFilter::Indian => Race::Indian,
    };
    faces
        .into_iter()
        .filter(|f| f.race == wanted || f.race == Race::Unknown)
        .collect()
}
