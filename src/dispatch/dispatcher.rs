//! # Queue Dispatcher
//!
//! The scheduler loop. Each poll tick computes available in-flight capacity,
//! claims a batch sized to it, and hands every claimed entry to a supervised
//! task on the bounded worker pool. Supervision arms an optional per-entry
//! timeout timer that races natural completion: a single compare-and-swap
//! outcome cell decides the winner, so exactly one of
//! {completion, timeout-cancellation} performs the terminal status write and
//! the loser no-ops. The database write is additionally guarded on the row
//! still being PROCESSING, which keeps the transition idempotent even across
//! a concurrent stale-recovery pass.
//!
//! Polling is fixed-delay, not fixed-rate: the next tick is scheduled only
//! after the previous one returns, so slow ticks self-throttle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use sqlx::PgPool;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{DispatcherConfig, OutboxConfig};
use crate::dispatch::backoff::BackoffPolicy;
use crate::dispatch::claimer::{ClaimedEntry, EntryClaimer};
use crate::dispatch::consumer::{DispatchError, EntryConsumer};
use crate::dispatch::worker_pool::WorkerPool;
use crate::error::Result;
use crate::metrics::{MetricsSnapshot, QueueMetrics};
use crate::models::QueueEntry;
use crate::registry::HandlerRegistry;

/// In-memory bookkeeping state for one claimed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Submitted,
    Running,
    CompletedOk,
    CompletedError,
    CancelledTimeout,
}

/// What one poll tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// In-flight capacity was exhausted; no claim was attempted.
    AtCapacity,
    /// A claim ran and this many entries were submitted.
    Dispatched(usize),
}

/// Poll-driven dispatch engine for one worker process.
pub struct QueueDispatcher {
    db: PgPool,
    config: DispatcherConfig,
    backoff: BackoffPolicy,
    claimer: EntryClaimer,
    consumer: Arc<EntryConsumer>,
    worker_pool: WorkerPool,
    in_flight: Arc<Semaphore>,
    executions: Arc<Mutex<HashMap<i64, ExecutionState>>>,
    metrics: Arc<QueueMetrics>,
}

impl Clone for QueueDispatcher {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            config: self.config.clone(),
            backoff: self.backoff.clone(),
            claimer: self.claimer.clone(),
            consumer: Arc::clone(&self.consumer),
            worker_pool: self.worker_pool.clone(),
            in_flight: Arc::clone(&self.in_flight),
            executions: Arc::clone(&self.executions),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl QueueDispatcher {
    pub fn new(
        db: PgPool,
        config: &OutboxConfig,
        registry: Arc<HandlerRegistry>,
        metrics: Arc<QueueMetrics>,
    ) -> Self {
        let dispatcher_config = config.dispatcher.clone();
        Self {
            claimer: EntryClaimer::new(
                db.clone(),
                config.worker_id.clone(),
                dispatcher_config.max_attempts,
                Arc::clone(&metrics),
            ),
            consumer: Arc::new(EntryConsumer::new(registry)),
            worker_pool: WorkerPool::new(
                dispatcher_config.pool_size,
                dispatcher_config.queue_capacity,
            ),
            in_flight: Arc::new(Semaphore::new(dispatcher_config.pool_size)),
            backoff: BackoffPolicy::new(&config.backoff),
            executions: Arc::new(Mutex::new(HashMap::new())),
            config: dispatcher_config,
            db,
            metrics,
        }
    }

    /// Run the poll loop until `shutdown` flips to `true` or its sender drops.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            info!("dispatcher disabled by configuration");
            return;
        }

        info!(
            worker_id = %self.claimer.worker_id(),
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            pool_size = self.config.pool_size,
            "dispatcher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.poll_once().await {
                error!(error = %e, "poll tick failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("dispatcher stopped");
    }

    /// One poll tick: capacity check, claim, submit.
    #[instrument(skip(self))]
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let available = self.in_flight.available_permits();
        if available == 0 {
            self.metrics.record_poll_skipped();
            debug!("in-flight capacity exhausted, skipping poll");
            return Ok(PollOutcome::AtCapacity);
        }

        let batch_size = std::cmp::min(self.config.batch_size, available as i64);
        let batch = self.claimer.claim(batch_size, Utc::now()).await?;
        let submitted = batch.len();

        for entry in batch {
            self.submit_entry(entry).await;
        }

        Ok(PollOutcome::Dispatched(submitted))
    }

    /// Acquire capacity and hand `entry` to a supervised task.
    ///
    /// A rejected submission is not dropped: it takes the same
    /// FAILED-with-backoff transition as a handler failure, so every claimed
    /// entry ends at DONE or a re-queued FAILED.
    async fn submit_entry(&self, entry: ClaimedEntry) {
        let permit = match Arc::clone(&self.in_flight).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.metrics.record_executor_rejected();
                let rejection = DispatchError::PoolRejected { entry_id: entry.id };
                warn!(entry_id = entry.id, "in-flight capacity raced away, requeueing entry");
                self.persist_failure(&entry, &rejection).await;
                return;
            }
        };

        let slot = match self.worker_pool.try_acquire_slot() {
            Some(slot) => slot,
            None => {
                self.metrics.record_executor_rejected();
                let rejection = DispatchError::PoolRejected { entry_id: entry.id };
                warn!(entry_id = entry.id, "worker pool saturated, requeueing entry");
                self.persist_failure(&entry, &rejection).await;
                return;
            }
        };

        self.set_state(entry.id, ExecutionState::Submitted);
        let dispatcher = self.clone();
        self.worker_pool.spawn(slot, async move {
            dispatcher.supervise_entry(entry, permit).await;
        });
    }

    /// Execute one entry's handlers and reconcile the outcome.
    async fn supervise_entry(self, entry: ClaimedEntry, _permit: OwnedSemaphorePermit) {
        self.set_state(entry.id, ExecutionState::Running);

        // Exactly one of {natural completion, timeout timer} may claim the
        // outcome; the loser observes the cell already taken and no-ops.
        let outcome_claimed = Arc::new(AtomicBool::new(false));

        let consumer = Arc::clone(&self.consumer);
        let task_entry = entry.clone();
        let handle = tokio::spawn(async move { consumer.handle(&task_entry).await });

        let timer = self.config.handler_timeout().map(|timeout| {
            let dispatcher = self.clone();
            let timer_entry = entry.clone();
            let claimed = Arc::clone(&outcome_claimed);
            let abort_handle = handle.abort_handle();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if claim_outcome(&claimed) {
                    abort_handle.abort();
                    dispatcher.metrics.record_timeout_cancelled();
                    dispatcher.set_state(timer_entry.id, ExecutionState::CancelledTimeout);
                    let error = DispatchError::Timeout {
                        entry_id: timer_entry.id,
                        timeout_ms: timeout.as_millis() as u64,
                    };
                    dispatcher.persist_failure(&timer_entry, &error).await;
                }
            })
        });

        enum Reconciled {
            Done,
            Failed(DispatchError),
            LostRace,
        }

        let reconciled = match handle.await {
            Ok(Ok(())) => {
                if claim_outcome(&outcome_claimed) {
                    Reconciled::Done
                } else {
                    Reconciled::LostRace
                }
            }
            Ok(Err(dispatch_error)) => {
                if claim_outcome(&outcome_claimed) {
                    Reconciled::Failed(dispatch_error)
                } else {
                    Reconciled::LostRace
                }
            }
            Err(join_error) if join_error.is_panic() => {
                if claim_outcome(&outcome_claimed) {
                    Reconciled::Failed(DispatchError::Panicked {
                        entry_id: entry.id,
                        detail: join_error.to_string(),
                    })
                } else {
                    Reconciled::LostRace
                }
            }
            // Aborted: the timer won the race and owns the outcome write
            Err(_) => Reconciled::LostRace,
        };

        match reconciled {
            Reconciled::Done => {
                self.set_state(entry.id, ExecutionState::CompletedOk);
                self.persist_done(&entry).await;
                if let Some(timer) = timer {
                    timer.abort();
                }
            }
            Reconciled::Failed(dispatch_error) => {
                self.set_state(entry.id, ExecutionState::CompletedError);
                self.persist_failure(&entry, &dispatch_error).await;
                if let Some(timer) = timer {
                    timer.abort();
                }
            }
            Reconciled::LostRace => {
                // The timeout path owns the terminal write; wait for it so
                // the entry is never left PROCESSING by a dropped timer task.
                if let Some(timer) = timer {
                    let _ = timer.await;
                }
            }
        }

        self.clear_state(entry.id);
    }

    /// Persist a successful dispatch. Zero affected rows means another path
    /// already recorded an outcome for this claim; nothing is overwritten.
    async fn persist_done(&self, entry: &ClaimedEntry) {
        let now = Utc::now();
        match QueueEntry::mark_done(&self.db, entry.id, now).await {
            Ok(1) => {
                self.metrics.record_done();
                info!(
                    entry_id = entry.id,
                    event_name = %entry.event_name,
                    attempt = entry.attempt_count,
                    "entry dispatched"
                );
            }
            Ok(_) => {
                debug!(entry_id = entry.id, "outcome already recorded, skipping done write");
            }
            Err(e) => {
                error!(error = %e, entry_id = entry.id, "failed to persist done outcome");
            }
        }
    }

    /// Persist a failed dispatch with the backoff-scheduled next attempt.
    async fn persist_failure(&self, entry: &ClaimedEntry, dispatch_error: &DispatchError) {
        let now = Utc::now();
        let next_attempt_at = now + self.backoff.chrono_delay_for_attempt(entry.attempt_count);
        let error_text = dispatch_error.to_string();

        match QueueEntry::mark_failed(&self.db, entry.id, next_attempt_at, &error_text, now).await
        {
            Ok(1) => {
                self.metrics.record_failed();
                let exhausted = entry.attempt_count >= self.config.max_attempts;
                if !exhausted {
                    self.metrics.record_retry_scheduled();
                }
                warn!(
                    entry_id = entry.id,
                    event_name = %entry.event_name,
                    attempt = entry.attempt_count,
                    exhausted = exhausted,
                    next_attempt_at = %next_attempt_at,
                    error = %error_text,
                    "entry failed"
                );
            }
            Ok(_) => {
                debug!(entry_id = entry.id, "outcome already recorded, skipping failure write");
            }
            Err(e) => {
                error!(error = %e, entry_id = entry.id, "failed to persist failure outcome");
            }
        }
    }

    /// Counter snapshot with live gauges.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        let available = self.in_flight.available_permits();
        let in_flight = self.config.pool_size.saturating_sub(available);
        self.metrics.snapshot(in_flight, available)
    }

    /// Entries currently under supervision.
    pub fn in_flight_count(&self) -> usize {
        self.config
            .pool_size
            .saturating_sub(self.in_flight.available_permits())
    }

    /// Bookkeeping state for one entry, if it is currently supervised.
    pub fn execution_state(&self, entry_id: i64) -> Option<ExecutionState> {
        self.executions.lock().get(&entry_id).copied()
    }

    pub fn worker_pool(&self) -> &WorkerPool {
        &self.worker_pool
    }

    fn set_state(&self, entry_id: i64, state: ExecutionState) {
        self.executions.lock().insert(entry_id, state);
    }

    fn clear_state(&self, entry_id: i64) {
        self.executions.lock().remove(&entry_id);
    }
}

fn claim_outcome(cell: &AtomicBool) -> bool {
    cell.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_cell_single_winner() {
        let cell = AtomicBool::new(false);
        assert!(claim_outcome(&cell));
        assert!(!claim_outcome(&cell));
        assert!(!claim_outcome(&cell));
    }
}
