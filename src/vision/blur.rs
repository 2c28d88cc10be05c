//! Float-plane filtering used by the mask composer.

use ndarray::Array2;

/// Separable Gaussian blur on a float plane.
///
/// When `kernel_size` is 0 the kernel radius is derived from sigma the way
/// OpenCV does for float input (`2 * round(4 * sigma) + 1`), which mask
/// post-processing depends on for its feather width.
#[must_use]
pub fn gaussian_blur(plane: &Array2<f32>, sigma: f32, kernel_size: usize) -> Array2<f32> {
    if sigma <= 0.0 {
        return plane.clone();
    }
    let ksize = if kernel_size == 0 {
        2 * (4.0 * sigma).round() as usize + 1
    } else {
        kernel_size | 1
    };
    let radius = ksize / 2;

    let mut kernel = Vec::with_capacity(ksize);
    let denom = 2.0 * sigma * sigma;
    let mut sum = 0.0_f32;
    for i in 0..ksize {
        let d = i as f32 - radius as f32;
        let w = (-d * d / denom).exp();
        kernel.push(w);
        sum += w;
    }
    for w in &mut kernel {
        *w /= sum;
    }

    let (h, w) = (plane.shape()[0], plane.shape()[1]);
    let clamp = |v: i64, max: usize| v.clamp(0, max as i64 - 1) as usize;

    // horizontal pass
    let mut tmp = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (i, weight) in kernel.iter().enumerate() {
                let sx = clamp(x as i64 + i as i64 - radius as i64, w);
                acc += plane[[y, sx]] * weight;
            }
            tmp[[y, x]] = acc;
        }
    }

    // vertical pass
    let mut out = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (i, weight) in kernel.iter().enumerate() {
                let sy = clamp(y as i64 + i as i64 - radius as i64, h);
                acc += tmp[[sy, x]] * weight;
            }
            out[[y, x]] = acc;
        }
    }
    out
}

/// Bilinear resize of a float plane to `(width, height)`.
#[must_use]
pub fn resize_plane(plane: &Array2<f32>, width: usize, height: usize) -> Array2<f32> {
    let (src_h, src_w) = (plane.shape()[0], plane.shape()[1]);
    if src_h == height && src_w == width {
        return plane.clone();
    }
    let scale_x = src_w as f32 / width as f32;
    let scale_y = src_h as f32 / height as f32;

    let mut out = Array2::<f32>::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let sx = (x as f32 + 0.5) * scale_x - 0.5;
            let sy = (y as f32 + 0.5) * scale_y - 0.5;
            let x0 = sx.floor().max(0.0) as usize;
            let y0 = sy.floor().max(0.0) as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let y1 = (y0 + 1).min(src_h - 1);
            let fx = (sx - x0 as f32).clamp(0.0, 1.0);
            let fy = (sy - y0 as f32).clamp(0.0, 1.0);

            let top = plane[[y0, x0]] + (plane[[y0, x1]] - plane[[y0, x0]]) * fx;
            let bottom = plane[[y1, x0]] + (plane[[y1, x1]] - plane[[y1, x0]]) * fx;
            out[[y, x]] = top + (bottom - top) * fy;
        }
    }
    out
}
