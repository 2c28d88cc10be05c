//! Face cache.
//!
//! Analysed faces are cached per frame fingerprint so every processor in
//! the stage chain shares one analysis per frame, and under caller-chosen
//! names for faces that outlive any frame (the source average face,
//! reference faces). Readers share the lock; writers are exclusive.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::vision::Frame;

use super::types::Face;

/// Thread-safe face cache keyed by frame fingerprint and by name.
pub struct FaceStore {
    frames: RwLock<FxHashMap<u64, Vec<Face>>>,
    named: RwLock<FxHashMap<String, Vec<Face>>>,
}

impl FaceStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: RwLock::new(FxHashMap::default()),
            named: RwLock::new(FxHashMap::default()),
        }
    }

    /// The process-wide store, created on first access.
    pub fn global() -> &'static Arc<FaceStore> {
        static STORE: OnceLock<Arc<FaceStore>> = OnceLock::new();
        STORE.get_or_init(|| Arc::new(FaceStore::new()))
    }

    // ========================================================================
    // Frame-keyed slots
    // ========================================================================

    #[must_use]
    pub fn contains_frame(&self, frame: &Frame) -> bool {
        self.frames.read().contains_key(&frame.fingerprint())
    }

    /// Faces cached for this frame content, if any. An empty vector is a
    /// valid cached result ("no faces found").
    #[must_use]
    pub fn frame_faces(&self, frame: &Frame) -> Option<Vec<Face>> {
        self.frames.read().get(&frame.fingerprint()).cloned()
    }

    /// Caches faces for this frame content, replacing any previous entry.
    /// Re-analysis at a richer level upgrades the slot in place.
    pub fn insert_frame_faces(&self, frame: &Frame, faces: Vec<Face>) {
        self.frames.write().insert(frame.fingerprint(), faces);
    }

    pub fn remove_frame(&self, frame: &Frame) {
        self.frames.write().remove(&frame.fingerprint());
    }

    // ========================================================================
    // Named slots
    // ========================================================================

    #[must_use]
    pub fn contains_named(&self, name: &str) -> bool {
        self.named.read().contains_key(name)
    }

    #[must_use]
    pub fn named_faces(&self, name: &str) -> Option<Vec<Face>> {
        self.named.read().get(name).cloned()
    }

    pub fn insert_named_faces(&self, name: impl Into<String>, faces: Vec<Face>) {
        self.named.write().insert(name.into(), faces);
    }

    pub fn remove_named(&self, name: &str) {
        self.named.write().remove(name);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Drops every cached entry. Called between targets so fingerprint
    /// collisions cannot leak faces across unrelated media.
    pub fn clear(&self) {
        self.frames.write().clear();
        self.named.write().clear();
    }

    /// Number of frame-keyed entries currently cached.
    #[must_use]
    pub fn frame_entry_count(&self) -> usize {
        self.frames.read().len()
    }
}

impl Default for FaceStore {
    fn default() -> Self {
        Self::new()
    }
}
