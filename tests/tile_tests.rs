//! Tile Split/Stitch Tests
//!
//! Tests for:
//! - Coverage: tiles cover the whole frame, fixed tile shape, edge tiles
//!   shift inward rather than shrink
//! - Stitching: scale-1 reconstruction reproduces the source through the
//!   seam feathering

use visage::vision::tile::{split, stitch, TileLayout};
use visage::vision::Frame;

fn gradient_frame(width: u32, height: u32) -> Frame {
    let mut frame = Frame::new(width, height);
    let data = frame.data_mut();
    for y in 0..height as usize {
        for x in 0..width as usize {
            data[[y, x, 0]] = (x % 256) as u8;
            data[[y, x, 1]] = (y % 256) as u8;
            data[[y, x, 2]] = ((x + y) % 256) as u8;
        }
    }
    frame
}

#[test]
fn small_frame_is_a_single_tile() {
    let frame = gradient_frame(64, 64);
    let tiles = split(&frame, TileLayout::default());
    assert_eq!(tiles.len(), 1);
    assert_eq!(tiles[0].x, 0);
    assert_eq!(tiles[0].y, 0);
    assert_eq!(tiles[0].frame.width(), 64, "tile clamps to the frame");
}

#[test]
fn tiles_have_uniform_shape_and_cover_the_frame() {
    let layout = TileLayout {
        size: 64,
        overlap: 8,
        pad: 4,
    };
    let frame = gradient_frame(200, 150);
    let tiles = split(&frame, layout);
    assert!(tiles.len() > 1);

    let mut covered = vec![vec![false; 200]; 150];
    for tile in &tiles {
        assert_eq!(tile.frame.width(), 64);
        assert_eq!(tile.frame.height(), 64);
        assert!(tile.x + 64 <= 200);
        assert!(tile.y + 64 <= 150);
        for y in tile.y..tile.y + 64 {
            for x in tile.x..tile.x + 64 {
                covered[y as usize][x as usize] = true;
            }
        }
    }
    assert!(covered.iter().flatten().all(|&c| c), "full coverage");
}

#[test]
fn tiles_carry_source_pixels() {
    let layout = TileLayout {
        size: 32,
        overlap: 4,
        pad: 2,
    };
    let frame = gradient_frame(100, 80);
    for tile in split(&frame, layout) {
        let data = tile.frame.data();
        for (row, col) in [(0_usize, 0_usize), (15, 20), (31, 31)] {
            let fy = tile.y as usize + row;
            let fx = tile.x as usize + col;
            for c in 0..3 {
                assert_eq!(data[[row, col, c]], frame.data()[[fy, fx, c]]);
            }
        }
    }
}

#[test]
fn scale_one_stitch_reconstructs_the_source() {
    let layout = TileLayout {
        size: 48,
        overlap: 8,
        pad: 4,
    };
    let frame = gradient_frame(120, 90);
    let tiles = split(&frame, layout);
    let stitched = stitch(&tiles, 120, 90, 1);

    assert_eq!(stitched.width(), 120);
    assert_eq!(stitched.height(), 90);
    let mut worst = 0_i32;
    for (a, b) in stitched.data().iter().zip(frame.data().iter()) {
        worst = worst.max((i32::from(*a) - i32::from(*b)).abs());
    }
    assert!(worst <= 1, "seam feathering drift {worst} exceeds rounding");
}

#[test]
fn stitch_scales_output_dimensions() {
    let frame = gradient_frame(64, 64);
    let tiles = split(&frame, TileLayout::default());
    // pretend-upscale each tile by nearest-neighbour doubling
    let upscaled: Vec<_> = tiles
        .iter()
        .map(|tile| visage::vision::tile::Tile {
            frame: tile.frame.resize(tile.frame.width() * 2, tile.frame.height() * 2),
            x: tile.x,
            y: tile.y,
        })
        .collect();
    let stitched = stitch(&upscaled, 64, 64, 2);
    assert_eq!((stitched.width(), stitched.height()), (128, 128));
}
