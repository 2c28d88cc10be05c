//! Layout conversions between BGR frames and model tensors.
//!
//! The face models in this pipeline take RGB planes; frames are BGR, so the
//! channel swap happens here at the tensor boundary and nowhere else. Each
//! processor owns its normalisation constants and passes them in.

use ndarray::{Array2, Array4};

use super::Frame;

/// Packs a frame into a `[1, 3, H, W]` RGB tensor with per-channel
/// normalisation: `v = (px / 255 - mean[c]) / std[c]`.
#[must_use]
pub fn chw_input(frame: &Frame, mean: [f32; 3], std: [f32; 3]) -> Array4<f32> {
    let (h, w) = (frame.height() as usize, frame.width() as usize);
    let data = frame.data();
    let mut out = Array4::<f32>::zeros((1, 3, h, w));
    for y in 0..h {
        for x in 0..w {
            // frame channel order is BGR; tensor planes are RGB
            for (plane, bgr_c) in [(0usize, 2usize), (1, 1), (2, 0)] {
                let px = f32::from(data[[y, x, bgr_c]]) / 255.0;
                out[[0, plane, y, x]] = (px - mean[plane]) / std[plane];
            }
        }
    }
    out
}

/// Packs a frame into a `[1, H, W, 3]` RGB tensor scaled to [0, 1].
#[must_use]
pub fn hwc_input(frame: &Frame) -> Array4<f32> {
    let (h, w) = (frame.height() as usize, frame.width() as usize);
    let data = frame.data();
    let mut out = Array4::<f32>::zeros((1, h, w, 3));
    for y in 0..h {
        for x in 0..w {
            for (rgb_c, bgr_c) in [(0usize, 2usize), (1, 1), (2, 0)] {
                out[[0, y, x, rgb_c]] = f32::from(data[[y, x, bgr_c]]) / 255.0;
            }
        }
    }
    out
}

/// Unpacks a `[1, 3, H, W]` RGB tensor in [0, 1] into a BGR frame
/// (`v * 255`, clamped).
#[must_use]
pub fn frame_from_chw_unit(data: &[f32], height: usize, width: usize) -> Frame {
    let plane = height * width;
    let mut frame = Frame::new(width as u32, height as u32);
    let out = frame.data_mut();
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            for (rgb_plane, bgr_c) in [(0usize, 2usize), (1, 1), (2, 0)] {
                let v = data[rgb_plane * plane + idx] * 255.0;
                out[[y, x, bgr_c]] = v.clamp(0.0, 255.0) as u8;
            }
        }
    }
    frame
}

/// Unpacks a `[1, 3, H, W]` RGB tensor in [-1, 1] into a BGR frame.
///
/// The [-1, 1] range is first clamped, then mapped with the enhancer
/// models' historical `(v + 1) * 125` pixel scale.
#[must_use]
pub fn frame_from_chw_symmetric(data: &[f32], height: usize, width: usize) -> Frame {
    let plane = height * width;
    let mut frame = Frame::new(width as u32, height as u32);
    let out = frame.data_mut();
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            for (rgb_plane, bgr_c) in [(0usize, 2usize), (1, 1), (2, 0)] {
                let v = (data[rgb_plane * plane + idx].clamp(-1.0, 1.0) + 1.0) * 125.0;
                out[[y, x, bgr_c]] = v.clamp(0.0, 255.0) as u8;
            }
        }
    }
    frame
}

/// Extracts a single-channel float plane from a flat tensor slice.
#[must_use]
pub fn plane_from_slice(data: &[f32], height: usize, width: usize, plane_index: usize) -> Array2<f32> {
    let plane = height * width;
    let start = plane_index * plane;
    let mut out = Array2::<f32>::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            out[[y, x]] = data[start + y * width + x];
        }
    }
    out
}
