//! Counting semaphore bounding concurrent GPU-bound stage executions.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

struct Inner {
    permits: Mutex<usize>,
    available: Condvar,
}

/// Caps in-flight GPU work to keep the device out of OOM territory.
/// Cloned handles share the same permit pool.
#[derive(Clone)]
pub struct GpuSemaphore {
    inner: Arc<Inner>,
}

impl GpuSemaphore {
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                permits: Mutex::new(permits.max(1)),
                available: Condvar::new(),
            }),
        }
    }

    /// Blocks until a permit is free; the permit releases on drop.
    #[must_use]
    pub fn acquire(&self) -> GpuPermit {
        let mut permits = self.inner.permits.lock();
        while *permits == 0 {
            self.inner.available.wait(&mut permits);
        }
        *permits -= 1;
        GpuPermit {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// RAII permit from [`GpuSemaphore::acquire`].
pub struct GpuPermit {
    inner: Arc<Inner>,
}

impl Drop for GpuPermit {
    fn drop(&mut self) {
        let mut permits = self.inner.permits.lock();
        *permits += 1;
        self.inner.available.notify_one();
    }
}
