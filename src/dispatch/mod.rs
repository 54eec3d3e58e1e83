//! # Dispatch Engine
//!
//! Read-side of the outbox: claiming, handler execution, retry scheduling,
//! and the maintenance jobs that keep the queue healthy.
//!
//! ## Components
//!
//! - [`claimer::EntryClaimer`]: skip-locked batch claiming for one worker
//! - [`consumer::EntryConsumer`]: handler resolution and sequential dispatch
//! - [`backoff::BackoffPolicy`]: deterministic retry-delay calculation
//! - [`worker_pool::WorkerPool`]: bounded execution slots with rejection
//! - [`dispatcher::QueueDispatcher`]: the poll loop tying them together
//! - [`stale_recovery::StaleRecoveryJob`]: crash recovery for dead workers
//! - [`retention::RetentionCleanupJob`]: terminal-row purge

pub mod backoff;
pub mod claimer;
pub mod consumer;
pub mod dispatcher;
pub mod retention;
pub mod stale_recovery;
pub mod worker_pool;

pub use backoff::BackoffPolicy;
pub use claimer::{ClaimedEntry, EntryClaimer};
pub use consumer::{DispatchError, EntryConsumer};
pub use dispatcher::{ExecutionState, PollOutcome, QueueDispatcher};
pub use retention::{CleanupSummary, RetentionCleanupJob};
pub use stale_recovery::StaleRecoveryJob;
pub use worker_pool::{PoolSlot, WorkerPool};
