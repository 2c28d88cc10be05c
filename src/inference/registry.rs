//! Process-wide session pool.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::errors::Result;

use super::session::{InferenceSession, SessionKey};

/// Shared reference to a pooled session. The session stays loaded while any
/// handle exists, regardless of eviction policy.
pub type SessionHandle = Arc<InferenceSession>;

struct PoolEntry {
    session: SessionHandle,
    last_used: Instant,
}

/// Keyed pool of inference sessions.
///
/// Two `get_session` calls with the same [`SessionKey`] return handles to
/// one underlying session. Construction happens outside the pool lock so a
/// slow model load does not stall unrelated lookups; when two threads race
/// on the same key, the first insert wins and the loser's session is
/// dropped.
pub struct SessionRegistry {
    pool: Mutex<FxHashMap<SessionKey, PoolEntry>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(FxHashMap::default()),
        }
    }

    /// The process-wide registry, created on first access.
    pub fn global() -> &'static SessionRegistry {
        static REGISTRY: OnceLock<SessionRegistry> = OnceLock::new();
        REGISTRY.get_or_init(SessionRegistry::new)
    }

    /// Returns a shared handle for `key`, loading the model if needed.
    pub fn get_session(&self, key: &SessionKey) -> Result<SessionHandle> {
        if let Some(entry) = self.pool.lock().get_mut(key) {
            entry.last_used = Instant::now();
            return Ok(Arc::clone(&entry.session));
        }

        let loaded: SessionHandle = Arc::new(InferenceSession::load(key)?);

        let mut pool = self.pool.lock();
        let entry = pool.entry(key.clone()).or_insert_with(|| PoolEntry {
            session: loaded,
            last_used: Instant::now(),
        });
        entry.last_used = Instant::now();
        Ok(Arc::clone(&entry.session))
    }

    /// Evicts sessions with no outstanding handles whose last use is older
    /// than `max_idle`. Returns the number of sessions freed.
    pub fn cleanup_expired(&self, max_idle: Duration) -> usize {
        let mut pool = self.pool.lock();
        let before = pool.len();
        pool.retain(|key, entry| {
            let unreferenced = Arc::strong_count(&entry.session) == 1;
            let expired = entry.last_used.elapsed() >= max_idle;
            if unreferenced && expired {
                log::debug!("Evicting idle session for {}", key.model_path.display());
                false
            } else {
                true
            }
        });
        before - pool.len()
    }

    /// Drops every pooled session that has no outstanding handles, then
    /// clears the rest of the bookkeeping. Called at runner teardown to
    /// release GPU contexts before process exit.
    pub fn clear(&self) {
        self.pool.lock().clear();
    }

    /// Number of currently pooled sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.pool.lock().len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
