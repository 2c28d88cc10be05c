//! Face Type and Helper Tests
//!
//! Tests for:
//! - FaceBox: empty sentinel, extents, IoU
//! - NMS: suppression by IoU, score ordering of survivors
//! - Landmark condensation (68 -> 5) and embedding math
//! - Rotation bookkeeping: point/box round trips at 90/180/270
//! - Warp template constants (interop contract)
//! - FaceSelector: ordering, attribute filters, One/Reference modes

use glam::Vec2;
use smallvec::smallvec;

use visage::config::{
    FaceSelectorConfig, GenderFilter, RaceFilter, SelectorMode, SelectorOrder,
};
use visage::face::helper::{
    apply_nms, average_embedding, condense_landmark_68_to_5, iou, normalize_embedding,
    rotate_box_back, rotate_box_forward, rotate_point_back, rotate_point_forward, WarpTemplate,
};
use visage::face::selector::{filter_by_age, filter_by_gender, sort_by_order};
use visage::face::{AgeRange, Face, FaceBox, FaceSelectorOptions, Gender, Landmarks};

const EPSILON: f32 = 1e-4;

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

fn face_at(x: f32, y: f32, size: f32, score: f32) -> Face {
    Face {
        bounding_box: FaceBox::new(x, y, x + size, y + size),
        detector_score: score,
        ..Face::default()
    }
}

// ============================================================================
// FaceBox
// ============================================================================

#[test]
fn default_box_is_empty() {
    assert!(FaceBox::default().is_empty());
    assert!(Face::default().is_empty());
}

#[test]
fn valid_box_has_extents() {
    let bbox = FaceBox::new(10.0, 20.0, 40.0, 60.0);
    assert!(!bbox.is_empty());
    assert!(approx(bbox.width(), 30.0));
    assert!(approx(bbox.height(), 40.0));
    assert!(approx(bbox.area(), 1200.0));
    assert_eq!(bbox.center(), Vec2::new(25.0, 40.0));
}

#[test]
fn iou_of_identical_boxes_is_one() {
    let bbox = FaceBox::new(0.0, 0.0, 10.0, 10.0);
    assert!(approx(iou(&bbox, &bbox), 1.0));
}

#[test]
fn iou_of_disjoint_boxes_is_zero() {
    let a = FaceBox::new(0.0, 0.0, 10.0, 10.0);
    let b = FaceBox::new(20.0, 20.0, 30.0, 30.0);
    assert!(approx(iou(&a, &b), 0.0));
}

// ============================================================================
// NMS
// ============================================================================

#[test]
fn nms_suppresses_overlapping_lower_scores() {
    let boxes = vec![
        FaceBox::new(0.0, 0.0, 10.0, 10.0),
        FaceBox::new(1.0, 1.0, 11.0, 11.0), // heavy overlap with [0]
        FaceBox::new(50.0, 50.0, 60.0, 60.0),
    ];
    let scores = vec![0.9, 0.8, 0.7];
    let keep = apply_nms(&boxes, &scores, 0.4);
    assert_eq!(keep, vec![0, 2]);
}

#[test]
fn nms_keeps_everything_below_threshold() {
    let boxes = vec![
        FaceBox::new(0.0, 0.0, 10.0, 10.0),
        FaceBox::new(8.0, 8.0, 18.0, 18.0), // slight overlap
    ];
    let scores = vec![0.5, 0.9];
    let keep = apply_nms(&boxes, &scores, 0.4);
    assert_eq!(keep.len(), 2);
    assert_eq!(keep[0], 1, "survivors come highest score first");
}

// ============================================================================
// Landmarks and embeddings
// ============================================================================

#[test]
fn condense_68_averages_eyes_and_picks_anchors() {
    let mut landmark68: Landmarks = smallvec![Vec2::ZERO; 68];
    for i in 36..42 {
        landmark68[i] = Vec2::new(10.0, 20.0);
    }
    for i in 42..48 {
        landmark68[i] = Vec2::new(30.0, 20.0);
    }
    landmark68[30] = Vec2::new(20.0, 30.0);
    landmark68[48] = Vec2::new(12.0, 40.0);
    landmark68[54] = Vec2::new(28.0, 40.0);

    let five = condense_landmark_68_to_5(&landmark68);
    assert_eq!(five.len(), 5);
    assert!(approx(five[0].x, 10.0) && approx(five[0].y, 20.0));
    assert!(approx(five[1].x, 30.0) && approx(five[1].y, 20.0));
    assert_eq!(five[2], Vec2::new(20.0, 30.0));
    assert_eq!(five[3], Vec2::new(12.0, 40.0));
    assert_eq!(five[4], Vec2::new(28.0, 40.0));
}

#[test]
fn average_embedding_is_elementwise_mean() {
    let avg = average_embedding(&[vec![1.0, 2.0, 3.0], vec![3.0, 4.0, 5.0]]);
    assert_eq!(avg, vec![2.0, 3.0, 4.0]);
}

#[test]
fn normalized_embedding_has_unit_length() {
    let normed = normalize_embedding(&[3.0, 4.0]);
    let len: f32 = normed.iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!(approx(len, 1.0));
}

#[test]
fn cosine_distance_zero_for_identical_identity() {
    let mut a = Face::default();
    a.normed_embedding = normalize_embedding(&[1.0, 2.0, 3.0]);
    let b = a.clone();
    assert!(approx(a.cosine_distance(&b).unwrap(), 0.0));
}

#[test]
fn cosine_distance_missing_embedding_is_none() {
    let a = Face::default();
    let b = Face::default();
    assert!(a.cosine_distance(&b).is_none());
}

// ============================================================================
// Rotation bookkeeping
// ============================================================================

#[test]
fn point_rotation_round_trips_at_every_angle() {
    let size = (640, 480);
    let p = Vec2::new(123.0, 45.0);
    for angle in [0, 90, 180, 270] {
        let rotated = rotate_point_forward(p, angle, size);
        let back = rotate_point_back(rotated, angle, size);
        assert!(
            (back - p).length() < 1e-3,
            "angle {angle}: {p:?} -> {rotated:?} -> {back:?}"
        );
    }
}

#[test]
fn box_rotation_round_trips_at_every_angle() {
    let size = (320, 200);
    let bbox = FaceBox::new(10.0, 20.0, 110.0, 90.0);
    for angle in [90, 180, 270] {
        let rotated = rotate_box_forward(&bbox, angle, size);
        let back = rotate_box_back(&rotated, angle, size);
        assert!(approx(back.x_min, bbox.x_min));
        assert!(approx(back.y_min, bbox.y_min));
        assert!(approx(back.x_max, bbox.x_max));
        assert!(approx(back.y_max, bbox.y_max));
    }
}

// ============================================================================
// Warp templates
// ============================================================================

#[test]
fn arcface_128_template_matches_interop_constants() {
    let points = WarpTemplate::Arcface128V2.points();
    assert!(approx(points[0].x, 0.361_68));
    assert!(approx(points[0].y, 0.403_88));
    assert!(approx(points[2].x, 0.500_20));
    assert!(approx(points[4].y, 0.720_34));
}

#[test]
fn ffhq_template_matches_interop_constants() {
    let points = WarpTemplate::Ffhq512.points();
    assert!(approx(points[0].x, 0.376_92));
    assert!(approx(points[1].x, 0.622_86));
    assert!(approx(points[3].y, 0.725_41));
}

// ============================================================================
// Selector
// ============================================================================

#[test]
fn sort_left_right_orders_by_x() {
    let faces = vec![
        face_at(100.0, 0.0, 10.0, 0.9),
        face_at(0.0, 0.0, 10.0, 0.8),
        face_at(50.0, 0.0, 10.0, 0.7),
    ];
    let sorted = sort_by_order(faces, SelectorOrder::LeftRight);
    let xs: Vec<f32> = sorted.iter().map(|f| f.bounding_box.x_min).collect();
    assert_eq!(xs, vec![0.0, 50.0, 100.0]);
}

#[test]
fn sort_best_worst_orders_by_score_descending() {
    let faces = vec![
        face_at(0.0, 0.0, 10.0, 0.5),
        face_at(0.0, 0.0, 10.0, 0.9),
        face_at(0.0, 0.0, 10.0, 0.7),
    ];
    let sorted = sort_by_order(faces, SelectorOrder::BestWorst);
    let scores: Vec<f32> = sorted.iter().map(|f| f.detector_score).collect();
    assert_eq!(scores, vec![0.9, 0.7, 0.5]);
}

#[test]
fn age_filter_keeps_overlapping_and_unclassified() {
    let mut young = face_at(0.0, 0.0, 10.0, 0.9);
    young.age = AgeRange::new(3, 9);
    let mut adult = face_at(0.0, 0.0, 10.0, 0.9);
    adult.age = AgeRange::new(30, 39);
    let unknown = face_at(0.0, 0.0, 10.0, 0.9);

    let kept = filter_by_age(vec![young, adult, unknown], 18, 99);
    assert_eq!(kept.len(), 2);
    assert!(kept.iter().all(|f| f.age.is_unset() || f.age.min >= 18));
}

#[test]
fn gender_filter_keeps_matching_and_unknown() {
    let mut male = face_at(0.0, 0.0, 10.0, 0.9);
    male.gender = Gender::Male;
    let mut female = face_at(0.0, 0.0, 10.0, 0.9);
    female.gender = Gender::Female;
    let unknown = face_at(0.0, 0.0, 10.0, 0.9);

    let kept = filter_by_gender(vec![male, female, unknown], GenderFilter::Female);
    assert_eq!(kept.len(), 2);
}

#[test]
fn one_mode_picks_position_in_order() {
    let selector = FaceSelectorOptions {
        config: FaceSelectorConfig {
            mode: SelectorMode::One,
            order: SelectorOrder::LeftRight,
            position: 1,
            ..FaceSelectorConfig::default()
        },
        reference: None,
        similarity_threshold: 0.6,
    };
    let faces = vec![
        face_at(200.0, 0.0, 10.0, 0.9),
        face_at(0.0, 0.0, 10.0, 0.9),
        face_at(100.0, 0.0, 10.0, 0.9),
    ];
    let selected = selector.select(faces);
    assert_eq!(selected.len(), 1);
    assert!(approx(selected[0].bounding_box.x_min, 100.0));
}

#[test]
fn reference_mode_filters_by_cosine_distance() {
    let mut reference = Face::default();
    reference.normed_embedding = normalize_embedding(&[1.0, 0.0, 0.0]);

    let mut same = face_at(0.0, 0.0, 10.0, 0.9);
    same.normed_embedding = normalize_embedding(&[0.95, 0.05, 0.0]);
    let mut other = face_at(20.0, 0.0, 10.0, 0.9);
    other.normed_embedding = normalize_embedding(&[0.0, 1.0, 0.0]);

    let selector = FaceSelectorOptions {
        config: FaceSelectorConfig {
            mode: SelectorMode::Reference,
            ..FaceSelectorConfig::default()
        },
        reference: Some(reference),
        similarity_threshold: 0.6,
    };
    let selected = selector.select(vec![same, other]);
    assert_eq!(selected.len(), 1);
    assert!(approx(selected[0].bounding_box.x_min, 0.0));
}

#[test]
fn reference_mode_without_reference_selects_nothing() {
    let selector = FaceSelectorOptions {
        config: FaceSelectorConfig {
            mode: SelectorMode::Reference,
            ..FaceSelectorConfig::default()
        },
        reference: None,
        similarity_threshold: 0.6,
    };
    assert!(selector.select(vec![face_at(0.0, 0.0, 10.0, 0.9)]).is_empty());
}

#[test]
fn race_filter_all_passes_everything() {
    let faces = vec![face_at(0.0, 0.0, 10.0, 0.9)];
    let kept = visage::face::selector::filter_by_race(faces, RaceFilter::All);
    assert_eq!(kept.len(), 1);
}
