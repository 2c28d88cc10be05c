//! Affine face warping.
//!
//! A face is aligned to a model's canonical crop by estimating the
//! similarity transform that maps its detected 5-point landmarks onto a
//! fixed template, warping the frame into the crop with that transform, and
//! later pasting the processed crop back through the inverse transform under
//! an alpha mask.

use glam::{Affine2, Mat2, Vec2};
use ndarray::{Array2, Array3};

use super::Frame;

/// Border handling for out-of-source samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Border {
    /// Clamp to the nearest edge pixel.
    Replicate,
    /// Sample as zero.
    Zero,
}

/// Estimates the similarity transform (rotation, uniform scale, translation)
/// mapping `src` points onto `dst` points by least squares.
///
/// Degenerate inputs (all points coincident) yield the identity transform.
#[must_use]
pub fn estimate_similarity(src: &[Vec2], dst: &[Vec2]) -> Affine2 {
    debug_assert_eq!(src.len(), dst.len());
    let n = src.len() as f32;
    if src.is_empty() {
        return Affine2::IDENTITY;
    }

    let src_mean = src.iter().copied().sum::<Vec2>() / n;
    let dst_mean = dst.iter().copied().sum::<Vec2>() / n;

    let mut var = 0.0_f32;
    let mut sxx = 0.0_f32;
    let mut sxy = 0.0_f32;
    for (p, q) in src.iter().zip(dst) {
        let p = *p - src_mean;
        let q = *q - dst_mean;
        var += p.length_squared();
        sxx += p.x * q.x + p.y * q.y;
        sxy += p.x * q.y - p.y * q.x;
    }
    if var <= f32::EPSILON {
        return Affine2::IDENTITY;
    }

    let a = sxx / var;
    let b = sxy / var;
    let linear = Mat2::from_cols(Vec2::new(a, b), Vec2::new(-b, a));
    let translation = dst_mean - linear * src_mean;
    Affine2::from_mat2_translation(linear, translation)
}

/// Estimates the frame-to-crop transform for a 5-point landmark set against
/// a normalised warp template scaled by the crop size.
#[must_use]
pub fn estimate_from_landmarks(
    landmarks: &[Vec2],
    template: &[Vec2; 5],
    crop_size: (u32, u32),
) -> Affine2 {
    let scaled: Vec<Vec2> = template
        .iter()
        .map(|p| Vec2::new(p.x * crop_size.0 as f32, p.y * crop_size.1 as f32))
        .collect();
    estimate_similarity(landmarks, &scaled)
}

/// Warps `src` through `transform` (src -> dst coordinates) into a
/// `dst_size` frame, sampling bilinearly.
#[must_use]
pub fn warp_frame(src: &Frame, transform: Affine2, dst_size: (u32, u32), border: Border) -> Frame {
    let (dst_w, dst_h) = dst_size;
    let inverse = transform.inverse();
    let data = src.data();
    let (src_h, src_w) = (src.height() as i64, src.width() as i64);

    let mut out = Array3::<u8>::zeros((dst_h as usize, dst_w as usize, 3));
    for y in 0..dst_h {
        for x in 0..dst_w {
            let p = inverse.transform_point2(Vec2::new(x as f32, y as f32));
            if border == Border::Zero
                && (p.x < -1.0 || p.y < -1.0 || p.x > src_w as f32 || p.y > src_h as f32)
            {
                continue;
            }
            let sample = sample_bilinear(data, src_w, src_h, p);
            for c in 0..3 {
                out[[y as usize, x as usize, c]] = sample[c];
            }
        }
    }
    Frame::from_array(out)
}

/// Warps a float mask through `transform` into a `dst_size` plane with zero
/// border, clamping output values to [0, 1].
#[must_use]
pub fn warp_mask(mask: &Array2<f32>, transform: Affine2, dst_size: (u32, u32)) -> Array2<f32> {
    let (dst_w, dst_h) = dst_size;
    let inverse = transform.inverse();
    let (src_h, src_w) = (mask.shape()[0] as i64, mask.shape()[1] as i64);

    let mut out = Array2::<f32>::zeros((dst_h as usize, dst_w as usize));
    for y in 0..dst_h {
        for x in 0..dst_w {
            let p = inverse.transform_point2(Vec2::new(x as f32, y as f32));
            if p.x < -1.0 || p.y < -1.0 || p.x > src_w as f32 || p.y > src_h as f32 {
                continue;
            }
            let v = sample_bilinear_f32(mask, src_w, src_h, p);
            out[[y as usize, x as usize]] = v.clamp(0.0, 1.0);
        }
    }
    out
}

/// Pastes a processed crop back into `frame` through the inverse of the
/// frame-to-crop transform, alpha-blended by `mask` (crop-sized, [0, 1]).
#[must_use]
pub fn paste_back(frame: &Frame, crop: &Frame, mask: &Array2<f32>, transform: Affine2) -> Frame {
    let frame_size = (frame.width(), frame.height());
    let inverse = transform.inverse();

    let frame_mask = warp_mask(mask, inverse, frame_size);
    let warped = warp_frame(crop, inverse, frame_size, Border::Replicate);

    let mut out = frame.data().clone();
    let warped_data = warped.data();
    for y in 0..frame_size.1 as usize {
        for x in 0..frame_size.0 as usize {
            let alpha = frame_mask[[y, x]];
            if alpha <= 0.0 {
                continue;
            }
            for c in 0..3 {
                let base = f32::from(out[[y, x, c]]);
                let top = f32::from(warped_data[[y, x, c]]);
                out[[y, x, c]] = (alpha * top + (1.0 - alpha) * base).round() as u8;
            }
        }
    }
    Frame::from_array(out)
}

/// Applies `transform` to a point set.
#[must_use]
pub fn transform_points(points: &[Vec2], transform: Affine2) -> Vec<Vec2> {
    points
        .iter()
        .map(|p| transform.transform_point2(*p))
        .collect()
}

fn sample_bilinear(data: &Array3<u8>, src_w: i64, src_h: i64, p: Vec2) -> [u8; 3] {
    let x0 = p.x.floor() as i64;
    let y0 = p.y.floor() as i64;
    let fx = p.x - x0 as f32;
    let fy = p.y - y0 as f32;

    let clamp = |x: i64, max: i64| x.clamp(0, max - 1) as usize;
    let (x0c, x1c) = (clamp(x0, src_w), clamp(x0 + 1, src_w));
    let (y0c, y1c) = (clamp(y0, src_h), clamp(y0 + 1, src_h));

    let mut out = [0u8; 3];
    for c in 0..3 {
        let v00 = f32::from(data[[y0c, x0c, c]]);
        let v01 = f32::from(data[[y0c, x1c, c]]);
        let v10 = f32::from(data[[y1c, x0c, c]]);
        let v11 = f32::from(data[[y1c, x1c, c]]);
        let top = v00 + (v01 - v00) * fx;
        let bottom = v10 + (v11 - v10) * fx;
        out[c] = (top + (bottom - top) * fy).round() as u8;
    }
    out
}

fn sample_bilinear_f32(data: &Array2<f32>, src_w: i64, src_h: i64, p: Vec2) -> f32 {
    let x0 = p.x.floor() as i64;
    let y0 = p.y.floor() as i64;
    let fx = p.x - x0 as f32;
    let fy = p.y - y0 as f32;

    let clamp = |x: i64, max: i64| x.clamp(0, max - 1) as usize;
    let (x0c, x1c) = (clamp(x0, src_w), clamp(x0 + 1, src_w));
    let (y0c, y1c) = (clamp(y0, src_h), clamp(y0 + 1, src_h));

    let v00 = data[[y0c, x0c]];
    let v01 = data[[y0c, x1c]];
    let v10 = data[[y1c, x0c]];
    let v11 = data[[y1c, x1c]];
    let top = v00 + (v01 - v00) * fx;
    let bottom = v10 + (v11 - v10) * fx;
    top + (bottom - top) * fy
}
