//! Pipeline Engine
//!
//! A bounded, ordered, multi-stage frame scheduler. Frames enter through a
//! bounded input queue, are processed by a pool of worker threads (each
//! worker runs one frame through the whole stage chain), and leave through
//! a bounded output queue in strict ascending sequence order, restored by a
//! reorder buffer and a single dispatcher thread.
//!
//! # Threads
//!
//! ```text
//! producer --push_frame--> [input queue] --> worker x N --> reorder buffer
//!                                                               |
//! consumer <--pop_frame--- [output queue] <-- dispatcher -------+
//! ```
//!
//! Cancellation is cooperative: `stop()` raises a flag that queue waiters
//! and workers observe between stages; in-flight stages finish first.

mod engine;
mod frame;
mod semaphore;

pub use engine::{Pipeline, PipelineConfig};
pub use frame::FrameData;
pub use semaphore::{GpuPermit, GpuSemaphore};
