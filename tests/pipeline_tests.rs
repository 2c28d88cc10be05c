//! Pipeline Engine Tests
//!
//! Tests for:
//! - Order preservation: any worker count, any per-frame latency, output is
//!   strictly ascending sequence ids
//! - End-of-stream drain and `pop_frame` termination
//! - Cancellation: ascending prefix, then the stream ends
//! - Stage failure: frame passes through unchanged, marked failed, ordering
//!   intact
//! - GPU semaphore: concurrent GPU-stage executions never exceed the cap
//! - Back-pressure: `push_frame` blocks at the queue bound
//! - Resumed streams: sequence ids may start anywhere

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use visage::errors::Result;
use visage::pipeline::{FrameData, Pipeline, PipelineConfig};
use visage::processors::FrameProcessor;
use visage::vision::Frame;

fn config(workers: usize, queue: usize) -> PipelineConfig {
    PipelineConfig {
        max_queue_size: queue,
        worker_thread_count: workers,
        max_concurrent_gpu_tasks: 2,
    }
}

fn test_frame(sequence_id: i64) -> FrameData {
    FrameData::new(sequence_id, Frame::new(4, 4))
}

/// Sleeps a deterministic pseudo-random 0-50 ms derived from the sequence
/// id, so worker completion order is well shuffled without a rand
/// dependency.
struct JitterStage;

impl FrameProcessor for JitterStage {
    fn name(&self) -> &str {
        "jitter"
    }

    fn uses_gpu(&self) -> bool {
        false
    }

    fn process(&self, frame: &mut FrameData) -> Result<()> {
        let millis = (frame.sequence_id as u64).wrapping_mul(2_654_435_761) % 50;
        std::thread::sleep(Duration::from_millis(millis));
        Ok(())
    }
}

struct FailOn {
    target: i64,
}

impl FrameProcessor for FailOn {
    fn name(&self) -> &str {
        "fail_on"
    }

    fn uses_gpu(&self) -> bool {
        false
    }

    fn process(&self, frame: &mut FrameData) -> Result<()> {
        if frame.sequence_id == self.target {
            return Err(visage::VisageError::InferenceFailed {
                context: "fail_on".into(),
                reason: "synthetic failure".into(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn output_is_strictly_ordered_under_parallelism() {
    let pipeline = Pipeline::new(&config(8, 16), vec![Box::new(JitterStage)]);
    pipeline.start();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for id in 0..100 {
                pipeline.push_frame(test_frame(id)).unwrap();
            }
            pipeline.push_frame(FrameData::end_of_stream(100)).unwrap();
        });

        let mut seen = Vec::new();
        while let Some(frame) = pipeline.pop_frame() {
            if frame.is_end_of_stream {
                break;
            }
            seen.push(frame.sequence_id);
        }
        assert_eq!(seen, (0..100).collect::<Vec<i64>>());
    });

    pipeline.stop();
}

#[test]
fn end_of_stream_terminates_pop() {
    let pipeline = Pipeline::new(&config(2, 4), vec![]);
    pipeline.start();

    pipeline.push_frame(test_frame(0)).unwrap();
    pipeline.push_frame(FrameData::end_of_stream(1)).unwrap();

    let first = pipeline.pop_frame().expect("one frame expected");
    assert_eq!(first.sequence_id, 0);
    let eos = pipeline.pop_frame().expect("eos expected");
    assert!(eos.is_end_of_stream);
    assert!(pipeline.pop_frame().is_none(), "stream drained");

    pipeline.stop();
}

#[test]
fn resumed_streams_start_mid_sequence() {
    let pipeline = Pipeline::new(&config(4, 8), vec![Box::new(JitterStage)]);
    pipeline.start();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for id in 50..80 {
                pipeline.push_frame(test_frame(id)).unwrap();
            }
            pipeline.push_frame(FrameData::end_of_stream(80)).unwrap();
        });

        let mut seen = Vec::new();
        while let Some(frame) = pipeline.pop_frame() {
            if frame.is_end_of_stream {
                break;
            }
            seen.push(frame.sequence_id);
        }
        assert_eq!(seen, (50..80).collect::<Vec<i64>>());
    });

    pipeline.stop();
}

// ============================================================================
// Failure semantics
// ============================================================================

#[test]
fn failed_stage_passes_frame_through_in_order() {
    let pipeline = Pipeline::new(&config(4, 8), vec![Box::new(FailOn { target: 7 })]);
    pipeline.start();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for id in 0..20 {
                pipeline.push_frame(test_frame(id)).unwrap();
            }
            pipeline.push_frame(FrameData::end_of_stream(20)).unwrap();
        });

        let mut seen = Vec::new();
        let mut failed = Vec::new();
        while let Some(frame) = pipeline.pop_frame() {
            if frame.is_end_of_stream {
                break;
            }
            if frame.failed {
                failed.push(frame.sequence_id);
            }
            seen.push(frame.sequence_id);
        }
        assert_eq!(seen, (0..20).collect::<Vec<i64>>(), "no frame lost");
        assert_eq!(failed, vec![7], "only the failing frame is marked");
    });

    pipeline.stop();
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn push_after_stop_is_cancelled() {
    let pipeline = Pipeline::new(&config(2, 4), vec![]);
    pipeline.start();
    pipeline.stop();

    let err = pipeline.push_frame(test_frame(0)).unwrap_err();
    assert!(matches!(err, visage::VisageError::Cancelled));
    assert!(pipeline.is_cancelled());
}

#[test]
fn cancellation_yields_ascending_prefix_then_end() {
    let pipeline = Arc::new(Pipeline::new(&config(4, 4), vec![Box::new(JitterStage)]));
    pipeline.start();

    let producer = {
        let pipeline = Arc::clone(&pipeline);
        std::thread::spawn(move || {
            for id in 0..1000 {
                if pipeline.push_frame(test_frame(id)).is_err() {
                    return;
                }
            }
        })
    };

    let mut seen = Vec::new();
    for _ in 0..10 {
        let Some(frame) = pipeline.pop_frame() else {
            break;
        };
        seen.push(frame.sequence_id);
    }
    pipeline.stop();
    producer.join().unwrap();

    // whatever came out before the stop is an ascending prefix
    for pair in seen.windows(2) {
        assert!(pair[0] < pair[1]);
    }
    // afterwards the stream drains and ends
    while pipeline.pop_frame().is_some() {}
}

// ============================================================================
// GPU semaphore
// ============================================================================

struct GpuCounterStage {
    current: Arc<AtomicI64>,
    peak: Arc<AtomicI64>,
}

impl FrameProcessor for GpuCounterStage {
    fn name(&self) -> &str {
        "gpu_counter"
    }

    fn process(&self, _frame: &mut FrameData) -> Result<()> {
        let now = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        std::thread::sleep(Duration::from_millis(5));
        self.current.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }
}

#[test]
fn gpu_semaphore_caps_concurrent_stage_executions() {
    let current = Arc::new(AtomicI64::new(0));
    let peak = Arc::new(AtomicI64::new(0));
    let stage = GpuCounterStage {
        current: Arc::clone(&current),
        peak: Arc::clone(&peak),
    };

    let config = PipelineConfig {
        max_queue_size: 32,
        worker_thread_count: 8,
        max_concurrent_gpu_tasks: 2,
    };
    let pipeline = Pipeline::new(&config, vec![Box::new(stage)]);
    pipeline.start();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for id in 0..64 {
                pipeline.push_frame(test_frame(id)).unwrap();
            }
            pipeline.push_frame(FrameData::end_of_stream(64)).unwrap();
        });
        while let Some(frame) = pipeline.pop_frame() {
            if frame.is_end_of_stream {
                break;
            }
        }
    });
    pipeline.stop();

    assert!(
        peak.load(Ordering::Acquire) <= 2,
        "GPU stage concurrency exceeded the semaphore cap"
    );
}

// ============================================================================
// Back-pressure
// ============================================================================

#[test]
fn push_blocks_at_high_water_mark_until_drained() {
    // a slow single worker holds the queue full
    struct SlowStage(Arc<AtomicUsize>);
    impl FrameProcessor for SlowStage {
        fn name(&self) -> &str {
            "slow"
        }
        fn uses_gpu(&self) -> bool {
            false
        }
        fn process(&self, _frame: &mut FrameData) -> Result<()> {
            self.0.fetch_add(1, Ordering::AcqRel);
            std::thread::sleep(Duration::from_millis(20));
            Ok(())
        }
    }

    let processed = Arc::new(AtomicUsize::new(0));
    let pipeline = Arc::new(Pipeline::new(
        &config(1, 2),
        vec![Box::new(SlowStage(Arc::clone(&processed)))],
    ));
    pipeline.start();

    let producer = {
        let pipeline = Arc::clone(&pipeline);
        std::thread::spawn(move || {
            let start = std::time::Instant::now();
            for id in 0..10 {
                pipeline.push_frame(test_frame(id)).unwrap();
            }
            pipeline.push_frame(FrameData::end_of_stream(10)).unwrap();
            start.elapsed()
        })
    };

    let mut emitted = 0;
    while let Some(frame) = pipeline.pop_frame() {
        if frame.is_end_of_stream {
            break;
        }
        emitted += 1;
    }
    let push_time = producer.join().unwrap();

    assert_eq!(emitted, 10);
    assert!(
        push_time >= Duration::from_millis(50),
        "producer should have been throttled by the bounded queue"
    );
    pipeline.stop();
}
