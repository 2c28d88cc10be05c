//! The pipeline's frame carrier.

use std::any::Any;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::face::Embedding;
use crate::vision::Frame;

/// One unit of pipeline work.
///
/// Exclusively owned by the queue slot or the worker currently processing
/// it; the image and attribute values may hold shared-immutable handles
/// that are cheap to copy by reference.
pub struct FrameData {
    /// Monotonically assigned per source; the ordering key.
    pub sequence_id: i64,
    /// Presentation timestamp in milliseconds, when the source has one.
    pub timestamp_ms: Option<i64>,
    /// The pixel payload (8-bit BGR, HWC).
    pub image: Frame,
    /// Free-form inter-stage hand-off (detected landmarks, source crops…).
    pub attributes: FxHashMap<String, Arc<dyn Any + Send + Sync>>,
    /// Marks the last frame of the stream; flows through like any frame
    /// and triggers orderly drain.
    pub is_end_of_stream: bool,
    /// Shared-immutable source identity embedding, injected by the runner.
    pub source_embedding: Option<Arc<Embedding>>,
    /// Set when a stage failed on this frame; remaining stages are skipped
    /// and the frame is emitted unchanged to preserve stream length.
    pub failed: bool,
}

impl FrameData {
    #[must_use]
    pub fn new(sequence_id: i64, image: Frame) -> Self {
        Self {
            sequence_id,
            timestamp_ms: None,
            image,
            attributes: FxHashMap::default(),
            is_end_of_stream: false,
            source_embedding: None,
            failed: false,
        }
    }

    /// The end-of-stream token for a stream whose last frame was
    /// `sequence_id - 1`.
    #[must_use]
    pub fn end_of_stream(sequence_id: i64) -> Self {
        let mut frame = Self::new(sequence_id, Frame::new(0, 0));
        frame.is_end_of_stream = true;
        frame
    }

    /// Stores a shared attribute under `key`.
    pub fn set_attribute<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.attributes.insert(key.into(), Arc::new(value));
    }

    /// A typed view of the attribute under `key`, if present.
    #[must_use]
    pub fn attribute<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.attributes
            .get(key)
            .and_then(|value| Arc::clone(value).downcast::<T>().ok())
    }
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameData")
            .field("sequence_id", &self.sequence_id)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("size", &(self.image.width(), self.image.height()))
            .field("is_end_of_stream", &self.is_end_of_stream)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}
