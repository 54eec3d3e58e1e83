//! Shared helpers for database-backed tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use outbox_core::config::OutboxConfig;
use outbox_core::events::{EventEnvelope, QueuePublisher};
use outbox_core::metrics::QueueMetrics;
use outbox_core::models::QueueEntry;

/// Configuration tuned for fast test loops.
pub fn test_config() -> OutboxConfig {
    let mut config = OutboxConfig::default();
    config.worker_id = format!("test-worker-{}", Uuid::new_v4());
    config.dispatcher.poll_interval_ms = 25;
    config.dispatcher.batch_size = 10;
    config.dispatcher.pool_size = 4;
    config.dispatcher.queue_capacity = 4;
    config.dispatcher.max_attempts = 5;
    config.dispatcher.handler_timeout_ms = 0;
    config.backoff.initial_ms = 10;
    config.backoff.multiplier = 1.0;
    config.backoff.max_ms = 100;
    config
}

pub fn sample_event(event_name: &str, schema_version: i32) -> EventEnvelope {
    EventEnvelope::new(event_name, schema_version, json!({"sample": true}))
        .with_request_id("req-test")
        .with_published_by("test-suite")
}

/// Publish one event through the real publisher, committing the transaction.
pub async fn seed_event(pool: &PgPool, event: &EventEnvelope) -> QueueEntry {
    let publisher = QueuePublisher::new(Arc::new(QueueMetrics::new()));
    let mut tx = pool.begin().await.expect("begin");
    let entry = publisher.publish(&mut tx, event).await.expect("publish");
    tx.commit().await.expect("commit");
    entry
}

/// Force a row into an arbitrary status with a chosen `updated_at` age.
pub async fn force_status(pool: &PgPool, id: i64, status: &str, updated_at: DateTime<Utc>) {
    sqlx::query("UPDATE outbox_entries SET status = $2, updated_at = $3 WHERE id = $1")
        .bind(id)
        .bind(status)
        .bind(updated_at)
        .execute(pool)
        .await
        .expect("force status");
}

/// Force a row into PROCESSING with a chosen lock timestamp.
pub async fn force_processing(pool: &PgPool, id: i64, locked_at: DateTime<Utc>, locked_by: &str) {
    sqlx::query(
        "UPDATE outbox_entries \
         SET status = 'processing', attempt_count = attempt_count + 1, \
             locked_at = $2, locked_by = $3, updated_at = $2 \
         WHERE id = $1",
    )
    .bind(id)
    .bind(locked_at)
    .bind(locked_by)
    .execute(pool)
    .await
    .expect("force processing");
}

pub async fn fetch_entry(pool: &PgPool, id: i64) -> QueueEntry {
    QueueEntry::find_by_id(pool, id)
        .await
        .expect("find entry")
        .expect("entry exists")
}

/// Poll the row until it reaches `expected` or the deadline passes.
pub async fn wait_for_status(
    pool: &PgPool,
    id: i64,
    expected: &str,
    timeout: Duration,
) -> QueueEntry {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let entry = fetch_entry(pool, id).await;
        if entry.status == expected {
            return entry;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "timed out waiting for entry {id} to reach '{expected}', still '{}' after {} attempts",
                entry.status, entry.attempt_count
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
