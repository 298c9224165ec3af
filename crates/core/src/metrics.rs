use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Counters for the capture loop, shared between the loop and its owner.
///
/// Cloning yields another handle to the same counters, so a session owner
/// can watch progress while the worker thread drives the loop.
///
/// # Example
/// ```rust
/// use tvin_core::metrics::LoopMetrics;
///
/// let metrics = LoopMetrics::default();
/// metrics.record_dequeued();
/// metrics.record_skipped();
/// assert_eq!(metrics.snapshot().dequeued, 1);
/// ```
#[derive(Debug, Default, Clone)]
pub struct LoopMetrics {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    dequeued: AtomicU64,
    delivered: AtomicU64,
    skipped: AtomicU64,
    requeued: AtomicU64,
}

/// Point-in-time copy of the loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopCounts {
    /// Buffers dequeued from the driver.
    pub dequeued: u64,
    /// Frames handed to the consumer.
    pub delivered: u64,
    /// Frames dropped by decimation.
    pub skipped: u64,
    /// Buffers handed back to the driver.
    pub requeued: u64,
}

impl LoopMetrics {
    /// Count a successful dequeue.
    pub fn record_dequeued(&self) {
        self.inner.dequeued.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a frame delivered to the consumer.
    pub fn record_delivered(&self) {
        self.inner.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a frame dropped by decimation.
    pub fn record_skipped(&self) {
        self.inner.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a buffer returned to the driver queue.
    pub fn record_requeued(&self) {
        self.inner.requeued.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters.
    pub fn snapshot(&self) -> LoopCounts {
        LoopCounts {
            dequeued: self.inner.dequeued.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            skipped: self.inner.skipped.load(Ordering::Relaxed),
            requeued: self.inner.requeued.load(Ordering::Relaxed),
        }
    }
}
