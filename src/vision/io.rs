//! Image file decode and encode.

use std::path::Path;

use image::{DynamicImage, ImageFormat, RgbImage};

use crate::errors::{Result, VisageError};

use super::Frame;

/// Reads an image file into a BGR frame.
pub fn read_image(path: impl AsRef<Path>) -> Result<Frame> {
    let path = path.as_ref();
    let dynamic = image::open(path).map_err(|e| {
        VisageError::ImageDecodeError(format!("{}: {e}", path.display()))
    })?;
    Ok(frame_from_rgb(&dynamic.into_rgb8()))
}

/// Writes a BGR frame to `path`, with the container chosen by `format`
/// (`png`, `jpg`, `jpeg`, `bmp`).
///
/// `quality` in 0..=100 applies to JPEG output only.
pub fn write_image(path: impl AsRef<Path>, frame: &Frame, format: &str, quality: u32) -> Result<()> {
    let path = path.as_ref();
    let rgb = frame_to_rgb(frame);

    match format {
        "jpg" | "jpeg" => {
            let file = std::fs::File::create(path)
                .map_err(|e| VisageError::OutputWriteFailed(format!("{}: {e}", path.display())))?;
            let writer = std::io::BufWriter::new(file);
            let quality = quality.clamp(1, 100) as u8;
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(writer, quality);
            rgb.write_with_encoder(encoder)
                .map_err(|e| VisageError::OutputWriteFailed(format!("{}: {e}", path.display())))?;
        }
        "png" | "bmp" => {
            let format = if format == "png" {
                ImageFormat::Png
            } else {
                ImageFormat::Bmp
            };
            rgb.save_with_format(path, format)
                .map_err(|e| VisageError::OutputWriteFailed(format!("{}: {e}", path.display())))?;
        }
        other => {
            return Err(VisageError::ParameterOutOfRange {
                field: "io.output.image_format".into(),
                value: other.to_string(),
            })
        }
    }
    Ok(())
}

/// Returns true when the path has a still-image extension.
#[must_use]
pub fn is_image_path(path: impl AsRef<Path>) -> bool {
    matches!(
        path.as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref(),
        Some("png" | "jpg" | "jpeg" | "bmp" | "webp")
    )
}

fn frame_from_rgb(rgb: &RgbImage) -> Frame {
    let (w, h) = rgb.dimensions();
    let mut bytes = rgb.as_raw().clone();
    for pixel in bytes.chunks_exact_mut(3) {
        pixel.swap(0, 2);
    }
    Frame::from_bgr_bytes(w, h, bytes).expect("decoded image dimensions are consistent")
}

fn frame_to_rgb(frame: &Frame) -> DynamicImage {
    let mut bytes = frame.clone().into_bgr_bytes();
    for pixel in bytes.chunks_exact_mut(3) {
        pixel.swap(0, 2);
    }
    let buffer = RgbImage::from_raw(frame.width(), frame.height(), bytes)
        .expect("frame dimensions are consistent");
    DynamicImage::ImageRgb8(buffer)
}
