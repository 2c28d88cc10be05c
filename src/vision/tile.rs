//! Overlap tiling for super-resolution models.
//!
//! Large frames are split into fixed-size tiles with an overlap band so the
//! model sees enough context at every edge; after inference the upscaled
//! tiles are stitched with a linear feather across the overlap to avoid
//! visible seams.

use ndarray::Array3;

use super::Frame;

/// Tiling geometry: tile edge length, overlap band and border pad, all in
/// input pixels.
#[derive(Debug, Clone, Copy)]
pub struct TileLayout {
    pub size: u32,
    pub overlap: u32,
    pub pad: u32,
}

impl Default for TileLayout {
    fn default() -> Self {
        Self {
            size: 256,
            overlap: 16,
            pad: 8,
        }
    }
}

/// A tile cut from the source frame, with its placement recorded.
#[derive(Debug, Clone)]
pub struct Tile {
    pub frame: Frame,
    /// Top-left corner of the tile in source coordinates.
    pub x: u32,
    pub y: u32,
}

/// Splits a frame into overlapping tiles covering it completely.
///
/// Every tile is exactly `layout.size` square; tiles at the right/bottom
/// edge are shifted inward rather than shrunk, so callers can batch them
/// through a fixed-shape model input.
#[must_use]
pub fn split(frame: &Frame, layout: TileLayout) -> Vec<Tile> {
    let size = layout.size.min(frame.width()).min(frame.height());
    let step = size.saturating_sub(layout.overlap).max(1);
    let data = frame.data();

    let mut tiles = Vec::new();
    let mut y = 0;
    loop {
        let ty = y.min(frame.height().saturating_sub(size));
        let mut x = 0;
        loop {
            let tx = x.min(frame.width().saturating_sub(size));
            let mut tile = Array3::<u8>::zeros((size as usize, size as usize, 3));
            for row in 0..size as usize {
                for col in 0..size as usize {
                    for c in 0..3 {
                        tile[[row, col, c]] =
                            data[[ty as usize + row, tx as usize + col, c]];
                    }
                }
            }
            tiles.push(Tile {
                frame: Frame::from_array(tile),
                x: tx,
                y: ty,
            });
            if tx + size >= frame.width() {
                break;
            }
            x += step;
        }
        if ty + size >= frame.height() {
            break;
        }
        y += step;
    }
    tiles
}

/// Stitches upscaled tiles back into a `(src_size * scale)` frame,
/// feathering the overlap bands linearly.
#[must_use]
pub fn stitch(tiles: &[Tile], src_width: u32, src_height: u32, scale: u32) -> Frame {
    let out_w = (src_width * scale) as usize;
    let out_h = (src_height * scale) as usize;
    let mut acc = Array3::<f32>::zeros((out_h, out_w, 3));
    let mut weight = ndarray::Array2::<f32>::zeros((out_h, out_w));

    for tile in tiles {
        let data = tile.frame.data();
        let th = data.shape()[0];
        let tw = data.shape()[1];
        let ox = (tile.x * scale) as usize;
        let oy = (tile.y * scale) as usize;

        for row in 0..th {
            let gy = oy + row;
            if gy >= out_h {
                continue;
            }
            // feather weight ramps from the tile border inward
            let wy = edge_weight(row, th);
            for col in 0..tw {
                let gx = ox + col;
                if gx >= out_w {
                    continue;
                }
                let w = wy * edge_weight(col, tw);
                for c in 0..3 {
                    acc[[gy, gx, c]] += f32::from(data[[row, col, c]]) * w;
                }
                weight[[gy, gx]] += w;
            }
        }
    }

    let mut out = Array3::<u8>::zeros((out_h, out_w, 3));
    for y in 0..out_h {
        for x in 0..out_w {
            let w = weight[[y, x]].max(f32::EPSILON);
            for c in 0..3 {
                out[[y, x, c]] = (acc[[y, x, c]] / w).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    Frame::from_array(out)
}

fn edge_weight(index: usize, extent: usize) -> f32 {
    let ramp = (extent / 8).max(1) as f32;
    let from_start = index as f32 + 1.0;
    let from_end = (extent - index) as f32;
    (from_start / ramp).min(from_end / ramp).min(1.0)
}
