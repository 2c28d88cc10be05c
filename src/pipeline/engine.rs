//! The bounded, order-preserving frame scheduler.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use flume::{Receiver, SendTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

use crate::errors::{Result, VisageError};
use crate::processors::FrameProcessor;

use super::frame::FrameData;
use super::semaphore::GpuSemaphore;

/// Cancellable blocking sends re-check the cancel flag at this cadence.
const SEND_POLL: Duration = Duration::from_millis(50);

/// Engine sizing; every option maps to one recognised config knob.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity of both the input and output queues; the producer blocks
    /// at this high-water mark.
    pub max_queue_size: usize,
    /// Parallel workers, each running one frame through the whole chain.
    pub worker_thread_count: usize,
    /// Cap on concurrent GPU-bound stage executions.
    pub max_concurrent_gpu_tasks: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 16,
            worker_thread_count: std::thread::available_parallelism()
                .map_or(1, std::num::NonZeroUsize::get),
            max_concurrent_gpu_tasks: 2,
        }
    }
}

struct ReorderState {
    buffer: BTreeMap<i64, FrameData>,
    /// The next sequence id the dispatcher may emit; seeded by the first
    /// `push_frame` so resumed streams start mid-sequence.
    next_expected: Option<i64>,
    live_workers: usize,
}

struct Shared {
    stages: Vec<Box<dyn FrameProcessor>>,
    cancelled: AtomicBool,
    gpu: GpuSemaphore,
    reorder: Mutex<ReorderState>,
    frame_ready: Condvar,
}

impl Shared {
    fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn deposit(&self, frame: FrameData) {
        let mut state = self.reorder.lock();
        state.buffer.insert(frame.sequence_id, frame);
        drop(state);
        self.frame_ready.notify_all();
    }
}

/// The pipeline engine. See the module docs for the thread topology.
pub struct Pipeline {
    shared: Arc<Shared>,
    input_tx: Mutex<Option<Sender<FrameData>>>,
    input_rx: Receiver<FrameData>,
    output_tx: Mutex<Option<Sender<FrameData>>>,
    output_rx: Receiver<FrameData>,
    worker_count: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Pipeline {
    /// Builds an engine over an ordered stage chain. Call [`start`]
    /// before pushing frames.
    ///
    /// [`start`]: Pipeline::start
    #[must_use]
    pub fn new(config: &PipelineConfig, stages: Vec<Box<dyn FrameProcessor>>) -> Self {
        let capacity = config.max_queue_size.max(1);
        let (input_tx, input_rx) = flume::bounded(capacity);
        let (output_tx, output_rx) = flume::bounded(capacity);

        Self {
            shared: Arc::new(Shared {
                stages,
                cancelled: AtomicBool::new(false),
                gpu: GpuSemaphore::new(config.max_concurrent_gpu_tasks),
                reorder: Mutex::new(ReorderState {
                    buffer: BTreeMap::new(),
                    next_expected: None,
                    live_workers: 0,
                }),
                frame_ready: Condvar::new(),
            }),
            input_tx: Mutex::new(Some(input_tx)),
            input_rx,
            output_tx: Mutex::new(Some(output_tx)),
            output_rx,
            worker_count: config.worker_thread_count.max(1),
            workers: Mutex::new(Vec::new()),
            dispatcher: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Spawns the worker pool and the output dispatcher. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.reorder.lock().live_workers = self.worker_count;

        let mut workers = self.workers.lock();
        for index in 0..self.worker_count {
            let shared = Arc::clone(&self.shared);
            let input_rx = self.input_rx.clone();
            workers.push(
                std::thread::Builder::new()
                    .name(format!("visage-worker-{index}"))
                    .spawn(move || worker_loop(&shared, &input_rx))
                    .expect("failed to spawn pipeline worker"),
            );
        }
        drop(workers);

        let shared = Arc::clone(&self.shared);
        let output_tx = self
            .output_tx
            .lock()
            .take()
            .expect("pipeline started twice");
        *self.dispatcher.lock() = Some(
            std::thread::Builder::new()
                .name("visage-dispatch".to_string())
                .spawn(move || dispatcher_loop(&shared, &output_tx))
                .expect("failed to spawn pipeline dispatcher"),
        );
    }

    /// Pushes a frame, blocking while the input queue is at capacity.
    ///
    /// Fails with `Cancelled` once the engine has been asked to stop.
    pub fn push_frame(&self, frame: FrameData) -> Result<()> {
        if self.shared.cancelled() {
            return Err(VisageError::Cancelled);
        }
        {
            let mut state = self.shared.reorder.lock();
            if state.next_expected.is_none() {
                state.next_expected = Some(frame.sequence_id);
            }
        }
        let Some(sender) = self.input_tx.lock().clone() else {
            return Err(VisageError::Cancelled);
        };

        let mut pending = frame;
        loop {
            match sender.send_timeout(pending, SEND_POLL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(frame)) => {
                    if self.shared.cancelled() {
                        return Err(VisageError::Cancelled);
                    }
                    pending = frame;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(VisageError::Cancelled),
            }
        }
    }

    /// Blocks for the next frame in sequence order; `None` once the stream
    /// has ended (or the engine was cancelled) and the output is drained.
    #[must_use]
    pub fn pop_frame(&self) -> Option<FrameData> {
        self.output_rx.recv().ok()
    }

    /// Signals cancellation, drains in-flight frames and joins every
    /// engine thread. Idempotent.
    pub fn stop(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
        self.shared.frame_ready.notify_all();
        // disconnect the input so blocked workers drain out
        *self.input_tx.lock() = None;

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.join();
        }
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            let _ = dispatcher.join();
        }
    }

    /// Closes the input side without cancelling: pushed frames finish and
    /// the dispatcher drains before `pop_frame` reports the end.
    pub fn finish_input(&self) {
        *self.input_tx.lock() = None;
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled()
    }

    /// Number of configured stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.shared.stages.len()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &Arc<Shared>, input_rx: &Receiver<FrameData>) {
    for mut frame in input_rx.iter() {
        if !frame.is_end_of_stream && !shared.cancelled() {
            for stage in &shared.stages {
                if shared.cancelled() || frame.failed {
                    break;
                }
                let _permit = stage.uses_gpu().then(|| shared.gpu.acquire());
                if let Err(err) = stage.process(&mut frame) {
                    log::warn!(
                        "Stage {} failed on frame {}: {err}; passing frame through",
                        stage.name(),
                        frame.sequence_id
                    );
                    frame.failed = true;
                }
            }
        }
        if shared.cancelled() && !frame.is_end_of_stream {
            // cancelled mid-stream: the frame is dropped, the dispatcher
            // exits via the flag rather than waiting on its id
            continue;
        }
        shared.deposit(frame);
    }

    let mut state = shared.reorder.lock();
    state.live_workers -= 1;
    drop(state);
    shared.frame_ready.notify_all();
}

fn dispatcher_loop(shared: &Arc<Shared>, output_tx: &Sender<FrameData>) {
    loop {
        let frame = {
            let mut state = shared.reorder.lock();
            loop {
                if shared.cancelled() {
                    return;
                }
                if let Some(next) = state.next_expected {
                    if let Some(frame) = state.buffer.remove(&next) {
                        state.next_expected = Some(next + 1);
                        break frame;
                    }
                }
                if state.live_workers == 0 {
                    // no further deposits are possible; drain what remains
                    // in ascending order, then end the stream
                    let Some((_, frame)) = state.buffer.pop_first() else {
                        return;
                    };
                    state.next_expected = Some(frame.sequence_id + 1);
                    break frame;
                }
                shared.frame_ready.wait(&mut state);
            }
        };

        let is_end = frame.is_end_of_stream;
        let mut pending = Some(frame);
        while let Some(frame) = pending.take() {
            match output_tx.send_timeout(frame, SEND_POLL) {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(frame)) => {
                    if shared.cancelled() {
                        return;
                    }
                    pending = Some(frame);
                }
                Err(SendTimeoutError::Disconnected(_)) => return,
            }
        }
        if is_end {
            return;
        }
    }
}
