//! The in-memory frame type.

use image::{imageops, ImageBuffer, Rgb, RgbImage};
use ndarray::Array3;
use xxhash_rust::xxh3::xxh3_64;

/// An 8-bit BGR image in HWC layout.
///
/// BGR byte order is the pipeline-wide convention: every processor accepts
/// and returns frames in this order, matching the rawvideo `bgr24` pixel
/// format the media layer exchanges with ffmpeg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Array3<u8>,
}

impl Frame {
    /// Creates a black frame of the given size.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: Array3::zeros((height as usize, width as usize, 3)),
        }
    }

    /// Wraps an existing `(height, width, 3)` BGR array.
    #[must_use]
    pub fn from_array(data: Array3<u8>) -> Self {
        debug_assert_eq!(data.shape()[2], 3, "frames are 3-channel BGR");
        Self { data }
    }

    /// Builds a frame from a raw `bgr24` byte buffer, row-major.
    ///
    /// Returns `None` when the buffer size does not match the dimensions.
    #[must_use]
    pub fn from_bgr_bytes(width: u32, height: u32, bytes: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * 3;
        if bytes.len() != expected {
            return None;
        }
        Array3::from_shape_vec((height as usize, width as usize, 3), bytes)
            .ok()
            .map(|data| Self { data })
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.data.shape()[1] as u32
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.data.shape()[0] as u32
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn data(&self) -> &Array3<u8> {
        &self.data
    }

    #[inline]
    #[must_use]
    pub fn data_mut(&mut self) -> &mut Array3<u8> {
        &mut self.data
    }

    /// Consumes the frame, returning contiguous `bgr24` bytes.
    #[must_use]
    pub fn into_bgr_bytes(self) -> Vec<u8> {
        if let Some(slice) = self.data.as_slice() {
            slice.to_vec()
        } else {
            self.data.iter().copied().collect()
        }
    }

    /// Content fingerprint over the raw pixel bytes (XXH3-64).
    ///
    /// Cheap relative to any model invocation; used as the face-cache key.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        if let Some(slice) = self.data.as_slice() {
            xxh3_64(slice)
        } else {
            let bytes: Vec<u8> = self.data.iter().copied().collect();
            xxh3_64(&bytes)
        }
    }

    /// Bilinear resize to the target dimensions.
    #[must_use]
    pub fn resize(&self, width: u32, height: u32) -> Self {
        if width == self.width() && height == self.height() {
            return self.clone();
        }
        let buffer = self.to_buffer();
        let resized = imageops::resize(&buffer, width, height, imageops::FilterType::Triangle);
        Self::from_buffer(&resized)
    }

    /// Rotates by a clockwise multiple of 90 degrees (`0`, `90`, `180`,
    /// `270`).
    #[must_use]
    pub fn rotate_90n(&self, angle: u32) -> Self {
        let view = self.data.view();
        let rotated = match angle % 360 {
            90 => {
                // transpose then reverse columns
                let mut t = view.permuted_axes([1, 0, 2]).to_owned();
                t.invert_axis(ndarray::Axis(1));
                t
            }
            180 => {
                let mut t = view.to_owned();
                t.invert_axis(ndarray::Axis(0));
                t.invert_axis(ndarray::Axis(1));
                t
            }
            270 => {
                let mut t = view.permuted_axes([1, 0, 2]).to_owned();
                t.invert_axis(ndarray::Axis(0));
                t
            }
            _ => return self.clone(),
        };
        // permuted_axes leaves a non-standard layout behind
        Self {
            data: Array3::from_shape_vec(rotated.raw_dim(), rotated.iter().copied().collect())
                .expect("rotation preserves element count"),
        }
    }

    /// Converts to an `image` buffer with the channel bytes passed through
    /// unchanged (still BGR; resize and encode treat channels uniformly).
    pub(crate) fn to_buffer(&self) -> RgbImage {
        let (h, w) = (self.height(), self.width());
        let bytes = self.clone().into_bgr_bytes();
        ImageBuffer::from_raw(w, h, bytes).expect("frame buffer dimensions are consistent")
    }

    pub(crate) fn from_buffer(buffer: &ImageBuffer<Rgb<u8>, Vec<u8>>) -> Self {
        let (w, h) = buffer.dimensions();
        Self::from_bgr_bytes(w, h, buffer.as_raw().clone())
            .expect("image buffer dimensions are consistent")
    }
}
