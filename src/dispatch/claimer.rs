//! # Entry Claimer
//!
//! Atomically claims batches of eligible entries for one worker. The claim
//! uses `FOR UPDATE SKIP LOCKED` row selection, so concurrent workers
//! partition the eligible set instead of serializing on row locks: a row
//! claimed by worker A is invisible to worker B's claim call for the
//! remainder of A's transaction, and B simply claims other rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::Result;
use crate::metrics::QueueMetrics;
use crate::models::QueueEntry;

/// Immutable snapshot of a freshly claimed entry.
///
/// `attempt_count` already includes the increment for the attempt being
/// executed; the backoff policy receives it unchanged on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedEntry {
    pub id: i64,
    pub event_id: Uuid,
    pub event_name: String,
    pub schema_version: i32,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub request_id: Option<String>,
    pub published_by: Option<String>,
    pub attempt_count: i32,
    pub claimed_at: DateTime<Utc>,
    pub locked_by: String,
}

impl ClaimedEntry {
    fn from_row(entry: QueueEntry, claimed_at: DateTime<Utc>, worker_id: &str) -> Self {
        Self {
            id: entry.id,
            event_id: entry.event_id,
            event_name: entry.event_name,
            schema_version: entry.schema_version,
            payload: entry.payload,
            occurred_at: entry.occurred_at,
            request_id: entry.request_id,
            published_by: entry.published_by,
            attempt_count: entry.attempt_count,
            claimed_at,
            locked_by: worker_id.to_string(),
        }
    }
}

/// Claim component for one worker process.
#[derive(Clone)]
pub struct EntryClaimer {
    pool: PgPool,
    worker_id: String,
    max_attempts: i32,
    metrics: Arc<QueueMetrics>,
}

impl EntryClaimer {
    pub fn new(
        pool: PgPool,
        worker_id: String,
        max_attempts: i32,
        metrics: Arc<QueueMetrics>,
    ) -> Self {
        Self {
            pool,
            worker_id,
            max_attempts,
            metrics,
        }
    }

    /// Claim up to `batch_size` eligible entries as of `now`.
    ///
    /// Returns immediately with an empty batch for `batch_size <= 0` without
    /// touching the database.
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn claim(&self, batch_size: i64, now: DateTime<Utc>) -> Result<Vec<ClaimedEntry>> {
        if batch_size <= 0 {
            return Ok(Vec::new());
        }

        let rows =
            QueueEntry::claim_batch(&self.pool, batch_size, self.max_attempts, &self.worker_id, now)
                .await?;

        if rows.is_empty() {
            debug!("no eligible entries to claim");
            return Ok(Vec::new());
        }

        self.metrics.record_claimed(rows.len() as u64);
        info!(
            claimed_count = rows.len(),
            first_id = rows.first().map(|e| e.id),
            "claimed entries for dispatch"
        );

        Ok(rows
            .into_iter()
            .map(|entry| ClaimedEntry::from_row(entry, now, &self.worker_id))
            .collect())
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }
}
