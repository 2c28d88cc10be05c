//! Mask Composition Tests
//!
//! Tests for:
//! - Static box mask: all-ones at zero padding/blur, padded borders, value
//!   range under blur
//! - Reduction: element-wise minimum, clamped to [0, 1]
//! - Gaussian blur: mass preservation on constant planes, range stability
//! - Plane resize

use ndarray::Array2;

use visage::masks::{reduce_masks, static_box_mask};
use visage::vision::{gaussian_blur, resize_plane};

// ============================================================================
// Box mask
// ============================================================================

#[test]
fn zero_padding_zero_blur_is_all_ones() {
    let mask = static_box_mask((64, 64), 0.0, [0, 0, 0, 0]);
    assert!(mask.iter().all(|&v| (v - 1.0).abs() < 1e-6));
}

#[test]
fn padding_zeroes_each_side_proportionally() {
    let mask = static_box_mask((100, 100), 0.0, [10, 0, 0, 0]);
    // top 10% cleared
    for x in 0..100 {
        assert_eq!(mask[[0, x]], 0.0);
        assert_eq!(mask[[9, x]], 0.0);
    }
    assert_eq!(mask[[50, 50]], 1.0);
}

#[test]
fn asymmetric_padding_respects_side_order() {
    // order: top, right, bottom, left
    let mask = static_box_mask((100, 100), 0.0, [0, 20, 0, 0]);
    assert_eq!(mask[[50, 99]], 0.0, "right border cleared");
    assert_eq!(mask[[50, 0]], 1.0, "left border kept");
}

#[test]
fn blurred_box_mask_stays_in_unit_range_and_feathers() {
    let mask = static_box_mask((64, 64), 0.3, [0, 0, 0, 0]);
    assert!(mask.iter().all(|&v| (0.0..=1.0).contains(&v)));
    // centre stays opaque, the border band is attenuated
    assert!(mask[[32, 32]] > 0.99);
    assert!(mask[[0, 32]] < 0.5);
}

// ============================================================================
// Reduction
// ============================================================================

#[test]
fn reduction_is_elementwise_minimum() {
    let a = Array2::from_elem((4, 4), 0.8_f32);
    let mut b = Array2::from_elem((4, 4), 0.6_f32);
    b[[2, 2]] = 0.9;

    let reduced = reduce_masks(&[a.clone(), b.clone()]);
    for y in 0..4 {
        for x in 0..4 {
            let expected = a[[y, x]].min(b[[y, x]]);
            assert!((reduced[[y, x]] - expected).abs() < 1e-6);
            assert!(reduced[[y, x]] <= a[[y, x]].min(b[[y, x]]) + 1e-6);
        }
    }
}

#[test]
fn reduction_clamps_to_unit_range() {
    let over = Array2::from_elem((2, 2), 1.5_f32);
    let under = Array2::from_elem((2, 2), -0.5_f32);
    assert!(reduce_masks(&[over])
        .iter()
        .all(|&v| (v - 1.0).abs() < 1e-6));
    assert!(reduce_masks(&[under]).iter().all(|&v| v.abs() < 1e-6));
}

#[test]
fn single_mask_reduces_to_itself() {
    let mask = static_box_mask((16, 16), 0.2, [5, 5, 5, 5]);
    let reduced = reduce_masks(std::slice::from_ref(&mask));
    for (a, b) in reduced.iter().zip(mask.iter()) {
        assert!((a - b.clamp(0.0, 1.0)).abs() < 1e-6);
    }
}

// ============================================================================
// Blur and resize primitives
// ============================================================================

#[test]
fn blur_preserves_constant_planes() {
    let plane = Array2::from_elem((32, 32), 0.7_f32);
    let blurred = gaussian_blur(&plane, 5.0, 0);
    assert!(blurred.iter().all(|&v| (v - 0.7).abs() < 1e-4));
}

#[test]
fn blur_with_zero_sigma_is_identity() {
    let mut plane = Array2::zeros((8, 8));
    plane[[4, 4]] = 1.0_f32;
    let blurred = gaussian_blur(&plane, 0.0, 0);
    assert_eq!(blurred, plane);
}

#[test]
fn blur_spreads_an_impulse() {
    let mut plane = Array2::zeros((17, 17));
    plane[[8, 8]] = 1.0_f32;
    let blurred = gaussian_blur(&plane, 2.0, 0);
    assert!(blurred[[8, 8]] < 1.0);
    assert!(blurred[[8, 9]] > 0.0);
    let total: f32 = blurred.iter().sum();
    assert!((total - 1.0).abs() < 1e-3, "mass preserved, got {total}");
}

#[test]
fn resize_plane_identity_and_scaling() {
    let mut plane = Array2::zeros((8, 8));
    plane[[2, 3]] = 1.0_f32;
    assert_eq!(resize_plane(&plane, 8, 8), plane);

    let doubled = resize_plane(&plane, 16, 16);
    assert_eq!(doubled.dim(), (16, 16));
    assert!(doubled.iter().all(|&v| (0.0..=1.0).contains(&v)));
}
