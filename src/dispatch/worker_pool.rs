//! # Worker Pool
//!
//! Bounded execution slots for entry supervision tasks: `pool_size`
//! concurrent workers plus a `queue_capacity` admission margin. Acquiring a
//! slot never blocks; when every slot is taken the submission is rejected,
//! and the dispatcher converges the rejected entry on the ordinary
//! FAILED-with-backoff path instead of queueing unboundedly. Size and
//! activity accessors feed the metrics gauges directly.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// Admission token for one submission. Dropping it (normally, on abort, or
/// on panic) frees the slot and decrements the active count.
pub struct PoolSlot {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded task pool with non-blocking admission.
#[derive(Clone)]
pub struct WorkerPool {
    pool_size: usize,
    queue_capacity: usize,
    slots: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(pool_size: usize, queue_capacity: usize) -> Self {
        Self {
            pool_size,
            queue_capacity,
            slots: Arc::new(Semaphore::new(pool_size + queue_capacity)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Try to admit one submission; `None` means the pool is saturated.
    pub fn try_acquire_slot(&self) -> Option<PoolSlot> {
        let permit = self.slots.clone().try_acquire_owned().ok()?;
        self.active.fetch_add(1, Ordering::SeqCst);
        Some(PoolSlot {
            _permit: permit,
            active: self.active.clone(),
        })
    }

    /// Spawn an admitted task; the slot is released when the task finishes
    /// or is aborted.
    pub fn spawn<F>(&self, slot: PoolSlot, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(async move {
            let _slot = slot;
            future.await
        })
    }

    /// Configured worker count.
    pub fn size(&self) -> usize {
        self.pool_size
    }

    /// Configured admission margin beyond the worker count.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Submissions currently admitted (running or awaiting a worker).
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Remaining admission slots.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}
