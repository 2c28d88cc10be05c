//! Warp and Frame Tests
//!
//! Tests for:
//! - Similarity estimation: exact recovery of known transforms, template
//!   scaling
//! - Frame warping: identity, translation sampling, border modes
//! - Paste-back alpha compositing
//! - Frame primitives: rotation round trips, resize, fingerprints

use glam::{Affine2, Vec2};

use visage::face::helper::WarpTemplate;
use visage::vision::warp::{
    estimate_from_landmarks, estimate_similarity, paste_back, transform_points, warp_frame,
    Border,
};
use visage::vision::Frame;

fn checker_frame(width: u32, height: u32) -> Frame {
    let mut frame = Frame::new(width, height);
    let data = frame.data_mut();
    for y in 0..height as usize {
        for x in 0..width as usize {
            let v = if (x + y) % 2 == 0 { 200 } else { 40 };
            for c in 0..3 {
                data[[y, x, c]] = v;
            }
        }
    }
    frame
}

// ============================================================================
// Similarity estimation
// ============================================================================

#[test]
fn estimate_recovers_pure_translation() {
    let src = vec![
        Vec2::new(0.0, 0.0),
        Vec2::new(10.0, 0.0),
        Vec2::new(0.0, 10.0),
        Vec2::new(10.0, 10.0),
        Vec2::new(5.0, 5.0),
    ];
    let dst: Vec<Vec2> = src.iter().map(|p| *p + Vec2::new(7.0, -3.0)).collect();

    let transform = estimate_similarity(&src, &dst);
    for (s, d) in src.iter().zip(&dst) {
        assert!((transform.transform_point2(*s) - *d).length() < 1e-4);
    }
}

#[test]
fn estimate_recovers_rotation_and_scale() {
    let angle = 30.0_f32.to_radians();
    let expected = Affine2::from_scale_angle_translation(
        Vec2::splat(2.0),
        angle,
        Vec2::new(4.0, 9.0),
    );
    let src = vec![
        Vec2::new(1.0, 1.0),
        Vec2::new(8.0, 2.0),
        Vec2::new(3.0, 7.0),
        Vec2::new(6.0, 6.0),
        Vec2::new(2.0, 4.0),
    ];
    let dst: Vec<Vec2> = src.iter().map(|p| expected.transform_point2(*p)).collect();

    let transform = estimate_similarity(&src, &dst);
    for (s, d) in src.iter().zip(&dst) {
        assert!((transform.transform_point2(*s) - *d).length() < 1e-3);
    }
}

#[test]
fn degenerate_points_fall_back_to_identity() {
    let src = vec![Vec2::new(5.0, 5.0); 5];
    let dst = vec![Vec2::new(9.0, 9.0); 5];
    assert_eq!(estimate_similarity(&src, &dst), Affine2::IDENTITY);
}

#[test]
fn landmark_estimate_maps_points_onto_scaled_template() {
    let template = WarpTemplate::Arcface128V2.points();
    let crop = (128, 128);
    // landmarks that already sit exactly on the scaled template
    let landmarks: Vec<Vec2> = template
        .iter()
        .map(|p| Vec2::new(p.x * 128.0, p.y * 128.0))
        .collect();

    let transform = estimate_from_landmarks(&landmarks, &template, crop);
    for p in &landmarks {
        assert!((transform.transform_point2(*p) - *p).length() < 1e-3);
    }
}

#[test]
fn transform_points_applies_affine() {
    let transform = Affine2::from_translation(Vec2::new(3.0, 4.0));
    let out = transform_points(&[Vec2::ZERO, Vec2::new(1.0, 1.0)], transform);
    assert_eq!(out[0], Vec2::new(3.0, 4.0));
    assert_eq!(out[1], Vec2::new(4.0, 5.0));
}

// ============================================================================
// Frame warping
// ============================================================================

#[test]
fn identity_warp_reproduces_the_frame() {
    let frame = checker_frame(16, 16);
    let warped = warp_frame(&frame, Affine2::IDENTITY, (16, 16), Border::Replicate);
    assert_eq!(warped, frame);
}

#[test]
fn integer_translation_shifts_pixels() {
    let frame = checker_frame(16, 16);
    let transform = Affine2::from_translation(Vec2::new(2.0, 0.0));
    let warped = warp_frame(&frame, transform, (16, 16), Border::Replicate);
    // dst(x) samples src(x - 2)
    assert_eq!(warped.data()[[5, 6, 0]], frame.data()[[5, 4, 0]]);
}

#[test]
fn zero_border_clears_outside_samples() {
    let frame = checker_frame(8, 8);
    let transform = Affine2::from_translation(Vec2::new(100.0, 100.0));
    let warped = warp_frame(&frame, transform, (8, 8), Border::Zero);
    assert!(warped.data().iter().all(|&v| v == 0));
}

#[test]
fn paste_back_full_mask_replaces_crop_region() {
    let base = Frame::new(16, 16);
    let mut crop = Frame::new(8, 8);
    crop.data_mut().fill(255);
    let mask = ndarray::Array2::from_elem((8, 8), 1.0_f32);

    // crop occupies the top-left corner of the frame
    let transform = Affine2::IDENTITY;
    let out = paste_back(&base, &crop, &mask, transform);
    assert_eq!(out.data()[[3, 3, 0]], 255);
    assert_eq!(out.data()[[12, 12, 0]], 0, "outside the crop is untouched");
}

#[test]
fn paste_back_half_alpha_blends() {
    let mut base = Frame::new(8, 8);
    base.data_mut().fill(100);
    let mut crop = Frame::new(8, 8);
    crop.data_mut().fill(200);
    let mask = ndarray::Array2::from_elem((8, 8), 0.5_f32);

    let out = paste_back(&base, &crop, &mask, Affine2::IDENTITY);
    assert_eq!(out.data()[[4, 4, 1]], 150);
}

// ============================================================================
// Frame primitives
// ============================================================================

#[test]
fn rotate_90_four_times_is_identity() {
    let frame = checker_frame(6, 4);
    let once = frame.rotate_90n(90);
    assert_eq!((once.width(), once.height()), (4, 6));
    let back = once.rotate_90n(270);
    assert_eq!(back, frame);
    let full = frame
        .rotate_90n(90)
        .rotate_90n(90)
        .rotate_90n(90)
        .rotate_90n(90);
    assert_eq!(full, frame);
}

#[test]
fn rotate_180_flips_both_axes() {
    let mut frame = Frame::new(4, 4);
    frame.data_mut()[[0, 0, 0]] = 9;
    let rotated = frame.rotate_90n(180);
    assert_eq!(rotated.data()[[3, 3, 0]], 9);
}

#[test]
fn resize_changes_dimensions() {
    let frame = checker_frame(32, 24);
    let resized = frame.resize(16, 12);
    assert_eq!((resized.width(), resized.height()), (16, 12));
    assert_eq!(frame.resize(32, 24), frame, "same-size resize is identity");
}

#[test]
fn bgr_bytes_round_trip() {
    let frame = checker_frame(5, 3);
    let bytes = frame.clone().into_bgr_bytes();
    assert_eq!(bytes.len(), 5 * 3 * 3);
    let rebuilt = Frame::from_bgr_bytes(5, 3, bytes).unwrap();
    assert_eq!(rebuilt, frame);
    assert!(Frame::from_bgr_bytes(5, 3, vec![0; 7]).is_none());
}
