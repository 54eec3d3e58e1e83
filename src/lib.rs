#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Outbox Core
//!
//! Transactional outbox and event-queue dispatch engine backed by PostgreSQL.
//!
//! ## Overview
//!
//! A unit of work records "an event happened" in the same transaction as the
//! business-state change it describes; this crate then delivers that event to
//! the handlers registered for it (at-least-once, with application-level
//! idempotency expected of handlers) across process crashes, slow handlers,
//! and competing worker instances.
//!
//! ## Architecture
//!
//! - **Write side**: [`events::QueuePublisher`] validates an
//!   [`events::EventEnvelope`] and inserts a queue row inside the caller's
//!   open transaction.
//! - **Read side**: [`dispatch::QueueDispatcher`] polls on a fixed delay,
//!   claims eligible rows with `FOR UPDATE SKIP LOCKED`, and executes the
//!   handlers resolved from the immutable [`registry::HandlerRegistry`]
//!   under bounded concurrency with a per-entry timeout.
//! - **Maintenance**: [`dispatch::StaleRecoveryJob`] requeues rows abandoned
//!   by crashed workers; [`dispatch::RetentionCleanupJob`] purges terminal
//!   rows past their retention windows.
//!
//! All cross-worker coordination goes through the `outbox_entries` table:
//! skip-locked claims partition work, and status-guarded outcome writes keep
//! every transition idempotent. Failed attempts are rescheduled with
//! deterministic exponential backoff until attempts are exhausted; a FAILED
//! row with no attempts left is the dead-letter state and stays queryable
//! until retention removes it.
//!
//! ## Module Organization
//!
//! - [`models`] - Queue entry row type, status state machine, store operations
//! - [`events`] - Event envelope and the transactional publisher
//! - [`registry`] - Explicit handler registration and lookup
//! - [`dispatch`] - Claimer, consumer, worker pool, dispatcher, maintenance jobs
//! - [`config`] - Typed configuration with environment overrides
//! - [`metrics`] - In-process counters and gauges
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use outbox_core::config::OutboxConfig;
//! use outbox_core::events::{EventEnvelope, QueuePublisher};
//! use outbox_core::metrics::QueueMetrics;
//! use serde_json::json;
//! use sqlx::PgPool;
//!
//! # async fn example(pool: &PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let config = OutboxConfig::from_env()?;
//! let metrics = Arc::new(QueueMetrics::new());
//! let publisher = QueuePublisher::new(metrics);
//!
//! // Inside the business transaction:
//! let mut tx = pool.begin().await?;
//! // ... business-state writes ...
//! let event = EventEnvelope::new("order_placed", 1, json!({"order_id": 42}))
//!     .with_request_id("req-123")
//!     .with_published_by("user-7");
//! publisher.publish(&mut tx, &event).await?;
//! tx.commit().await?;
//!
//! println!("queued under worker {}", config.worker_id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod registry;

pub use config::{
    BackoffConfig, DispatcherConfig, OutboxConfig, RetentionConfig, StaleRecoveryConfig,
};
pub use dispatch::{
    BackoffPolicy, ClaimedEntry, DispatchError, EntryClaimer, EntryConsumer, QueueDispatcher,
    RetentionCleanupJob, StaleRecoveryJob, WorkerPool,
};
pub use error::{OutboxError, Result};
pub use events::{EventEnvelope, QueuePublisher};
pub use metrics::{MetricsSnapshot, QueueMetrics};
pub use models::{EntryStatus, NewQueueEntry, QueueEntry};
pub use registry::{EventHandler, HandlerDescriptor, HandlerKey, HandlerRegistry};
