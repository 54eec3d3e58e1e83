//! # Queue Entry Model
//!
//! Durable storage for outbox events and every row operation the dispatch
//! engine performs against it.
//!
//! ## Overview
//!
//! A `QueueEntry` is the unit of durable work: one published event, its
//! payload, and the lifecycle bookkeeping (status, attempts, lock owner,
//! retry schedule) that the claim, outcome, recovery, and retention paths
//! mutate. All coordination between competing workers goes through this
//! table: claims take row locks with skip-on-contention semantics, and
//! outcome writes are guarded on the current status so a late writer affects
//! zero rows instead of resurrecting a terminal entry.
//!
//! ## Database Schema
//!
//! Maps to `outbox_entries` (see `migrations/0001_create_outbox_entries.sql`):
//! ```sql
//! CREATE TABLE outbox_entries (
//!   id BIGSERIAL PRIMARY KEY,
//!   event_id UUID NOT NULL UNIQUE,
//!   event_name VARCHAR NOT NULL,
//!   schema_version INTEGER NOT NULL,
//!   payload JSONB NOT NULL,
//!   status VARCHAR NOT NULL,
//!   attempt_count INTEGER NOT NULL,
//!   next_attempt_at TIMESTAMPTZ NOT NULL,
//!   locked_at TIMESTAMPTZ,
//!   locked_by VARCHAR,
//!   -- ... provenance and audit timestamps
//! );
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::models::entry_status::EntryStatus;

/// Diagnostic text is capped to protect the table from runaway messages.
pub const MAX_ERROR_TEXT_CHARS: usize = 2000;

/// Fixed diagnostic written by stale-lock recovery.
pub const STALE_LOCK_ERROR: &str = "processing lock timeout reached";

const ENTRY_COLUMNS: &str = "id, event_id, event_name, schema_version, payload, occurred_at, \
     request_id, published_by, status, attempt_count, next_attempt_at, \
     locked_at, locked_by, last_error, created_at, updated_at";

/// One durable outbox event row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct QueueEntry {
    pub id: i64,
    /// Caller-assigned idempotency key; duplicate publishes fail fast on it
    pub event_id: Uuid,
    pub event_name: String,
    pub schema_version: i32,
    pub payload: serde_json::Value,
    /// Business event time, distinct from row audit timestamps
    pub occurred_at: DateTime<Utc>,
    pub request_id: Option<String>,
    pub published_by: Option<String>,
    pub status: String,
    pub attempt_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New entry for insertion by the publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQueueEntry {
    pub event_id: Uuid,
    pub event_name: String,
    pub schema_version: i32,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub request_id: Option<String>,
    pub published_by: Option<String>,
}

impl QueueEntry {
    /// Parsed status of this row.
    pub fn entry_status(&self) -> Result<EntryStatus, String> {
        self.status.parse()
    }

    /// Insert a new entry with `status = new`, zero attempts, and immediate
    /// eligibility.
    ///
    /// Runs on the caller's connection so the write joins the caller's open
    /// transaction: the outbox row commits or rolls back with the business
    /// state change it describes. A duplicate `event_id` surfaces as the
    /// unique-violation database error and must not be swallowed.
    pub async fn insert(
        conn: &mut PgConnection,
        new_entry: NewQueueEntry,
    ) -> Result<QueueEntry, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO outbox_entries
                (event_id, event_name, schema_version, payload, occurred_at,
                 request_id, published_by, status, attempt_count, next_attempt_at,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'new', 0, NOW(), NOW(), NOW())
            RETURNING {ENTRY_COLUMNS}
            "#
        );

        sqlx::query_as::<_, QueueEntry>(&query)
            .bind(new_entry.event_id)
            .bind(&new_entry.event_name)
            .bind(new_entry.schema_version)
            .bind(&new_entry.payload)
            .bind(new_entry.occurred_at)
            .bind(&new_entry.request_id)
            .bind(&new_entry.published_by)
            .fetch_one(conn)
            .await
    }

    /// Atomically claim up to `batch_size` eligible entries for `worker_id`.
    ///
    /// Eligible means `status IN (new, failed)`, `next_attempt_at <= now`,
    /// and `attempt_count < max_attempts`. Selection is ordered by ascending
    /// id and uses `FOR UPDATE SKIP LOCKED`, so rows locked by a concurrent
    /// claimer are skipped rather than waited on; the status update happens
    /// in the same transaction, which makes a claimed row invisible to every
    /// other claimer until commit. Each claimed row transitions to
    /// `processing` with `attempt_count + 1` and the lock fields set.
    pub async fn claim_batch(
        pool: &PgPool,
        batch_size: i64,
        max_attempts: i32,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, sqlx::Error> {
        if batch_size <= 0 {
            return Ok(Vec::new());
        }

        let mut tx = pool.begin().await?;

        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM outbox_entries
            WHERE status IN ('new', 'failed')
              AND next_attempt_at <= $1
              AND attempt_count < $2
            ORDER BY id ASC
            LIMIT $3
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(max_attempts)
        .bind(batch_size)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let query = format!(
            r#"
            UPDATE outbox_entries
            SET status = 'processing',
                attempt_count = attempt_count + 1,
                locked_at = $1,
                locked_by = $2,
                updated_at = $1
            WHERE id = ANY($3)
            RETURNING {ENTRY_COLUMNS}
            "#
        );

        let mut claimed = sqlx::query_as::<_, QueueEntry>(&query)
            .bind(now)
            .bind(worker_id)
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        // RETURNING carries no ordering guarantee
        claimed.sort_by_key(|entry| entry.id);
        Ok(claimed)
    }

    /// Mark a PROCESSING entry delivered: lock and error fields cleared.
    ///
    /// Guarded on the current status; returns the number of rows affected so
    /// a caller that lost the outcome race observes 0 instead of clobbering
    /// a terminal row.
    pub async fn mark_done(
        pool: &PgPool,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_entries
            SET status = 'done',
                locked_at = NULL,
                locked_by = NULL,
                last_error = NULL,
                updated_at = $2
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Mark a PROCESSING entry failed and schedule its next attempt.
    ///
    /// Same status guard as [`QueueEntry::mark_done`]. The diagnostic text is
    /// truncated to [`MAX_ERROR_TEXT_CHARS`].
    pub async fn mark_failed(
        pool: &PgPool,
        id: i64,
        next_attempt_at: DateTime<Utc>,
        error_text: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let truncated: String = error_text.chars().take(MAX_ERROR_TEXT_CHARS).collect();

        let result = sqlx::query(
            r#"
            UPDATE outbox_entries
            SET status = 'failed',
                next_attempt_at = $2,
                last_error = $3,
                locked_at = NULL,
                locked_by = NULL,
                updated_at = $4
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(next_attempt_at)
        .bind(truncated)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Requeue PROCESSING entries whose lock was taken before `locked_before`.
    ///
    /// Crash recovery: the owning worker is presumed dead, so the row goes to
    /// `failed` with immediate eligibility and the fixed diagnostic. The
    /// attempt count is NOT incremented; the claim already counted this
    /// attempt.
    pub async fn requeue_stale_processing(
        pool: &PgPool,
        locked_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_entries
            SET status = 'failed',
                next_attempt_at = $2,
                last_error = $3,
                locked_at = NULL,
                locked_by = NULL,
                updated_at = $2
            WHERE status = 'processing' AND locked_at < $1
            "#,
        )
        .bind(locked_before)
        .bind(now)
        .bind(STALE_LOCK_ERROR)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Delete up to `limit` rows in `status` last updated before `cutoff`.
    pub async fn delete_older_than(
        pool: &PgPool,
        status: EntryStatus,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_entries
            WHERE id IN (
                SELECT id FROM outbox_entries
                WHERE status = $1 AND updated_at < $2
                ORDER BY id ASC
                LIMIT $3
            )
            "#,
        )
        .bind(status.as_str())
        .bind(cutoff)
        .bind(limit)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Find an entry by its caller-assigned event id.
    pub async fn find_by_event_id(
        pool: &PgPool,
        event_id: Uuid,
    ) -> Result<Option<QueueEntry>, sqlx::Error> {
        let query = format!("SELECT {ENTRY_COLUMNS} FROM outbox_entries WHERE event_id = $1");

        sqlx::query_as::<_, QueueEntry>(&query)
            .bind(event_id)
            .fetch_optional(pool)
            .await
    }

    /// Find an entry by surrogate id.
    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<QueueEntry>, sqlx::Error> {
        let query = format!("SELECT {ENTRY_COLUMNS} FROM outbox_entries WHERE id = $1");

        sqlx::query_as::<_, QueueEntry>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Queue depth for one status, for diagnostics and gauges.
    pub async fn count_by_status(
        pool: &PgPool,
        status: EntryStatus,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM outbox_entries WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(pool)
            .await
    }
}
