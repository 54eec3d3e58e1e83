//! # Queue Metrics
//!
//! In-process counters for the publish and dispatch surfaces. Counters are
//! plain atomics so every hot path can record without locking; gauges
//! (in-flight, available permits) are computed from the dispatcher's pool at
//! snapshot time rather than stored here.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Shared counter set for the outbox core.
///
/// One instance is shared by the publisher, dispatcher, and maintenance jobs.
/// All counters are cumulative since process start.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    publish_attempts: AtomicU64,
    publish_success: AtomicU64,
    publish_errors: AtomicU64,
    claimed: AtomicU64,
    polls_skipped: AtomicU64,
    executor_rejected: AtomicU64,
    timeouts_cancelled: AtomicU64,
    processed: AtomicU64,
    done: AtomicU64,
    failed: AtomicU64,
    retries_scheduled: AtomicU64,
    stale_recovered: AtomicU64,
    retention_deleted: AtomicU64,
}

/// Point-in-time view of every counter plus the dispatcher gauges.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub publish_attempts: u64,
    pub publish_success: u64,
    pub publish_errors: u64,
    pub claimed: u64,
    pub polls_skipped: u64,
    pub executor_rejected: u64,
    pub timeouts_cancelled: u64,
    pub processed: u64,
    pub done: u64,
    pub failed: u64,
    pub retries_scheduled: u64,
    pub stale_recovered: u64,
    pub retention_deleted: u64,
    /// Entries currently executing or awaiting a worker.
    pub in_flight: usize,
    /// Remaining in-flight capacity.
    pub available_permits: usize,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_publish_attempt(&self) {
        self.publish_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_success(&self) {
        self.publish_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_error(&self) {
        self.publish_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_claimed(&self, count: u64) {
        self.claimed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_poll_skipped(&self) {
        self.polls_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_executor_rejected(&self) {
        self.executor_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout_cancelled(&self) {
        self.timeouts_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_done(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry_scheduled(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_recovered(&self, count: u64) {
        self.stale_recovered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_retention_deleted(&self, count: u64) {
        self.retention_deleted.fetch_add(count, Ordering::Relaxed);
    }

    /// Snapshot every counter, attaching the caller-supplied gauges.
    pub fn snapshot(&self, in_flight: usize, available_permits: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            publish_attempts: self.publish_attempts.load(Ordering::Relaxed),
            publish_success: self.publish_success.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
            claimed: self.claimed.load(Ordering::Relaxed),
            polls_skipped: self.polls_skipped.load(Ordering::Relaxed),
            executor_rejected: self.executor_rejected.load(Ordering::Relaxed),
            timeouts_cancelled: self.timeouts_cancelled.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            done: self.done.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            stale_recovered: self.stale_recovered.load(Ordering::Relaxed),
            retention_deleted: self.retention_deleted.load(Ordering::Relaxed),
            in_flight,
            available_permits,
        }
    }
}
