//! Queue store tests: publish, claiming, and conditional outcome writes,
//! using SQLx native testing for automatic database isolation.

mod common;

use std::collections::HashSet;

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use sqlx::PgPool;
use uuid::Uuid;

use common::{fetch_entry, sample_event, seed_event};
use outbox_core::error::OutboxError;
use outbox_core::events::QueuePublisher;
use outbox_core::metrics::QueueMetrics;
use outbox_core::models::{EntryStatus, QueueEntry};
use std::sync::Arc;

#[sqlx::test(migrations = "./migrations")]
async fn test_publish_inserts_new_entry(pool: PgPool) {
    let event = sample_event("order_placed", 1);
    let entry = seed_event(&pool, &event).await;

    assert_eq!(entry.event_id, event.event_id);
    assert_eq!(entry.event_name, "order_placed");
    assert_eq!(entry.schema_version, 1);
    assert_eq!(entry.status, "new");
    assert_eq!(entry.attempt_count, 0);
    assert!(entry.locked_at.is_none());
    assert!(entry.locked_by.is_none());
    assert!(entry.last_error.is_none());
    assert!(entry.next_attempt_at <= Utc::now());
    assert_eq!(entry.request_id.as_deref(), Some("req-test"));
    assert_eq!(entry.published_by.as_deref(), Some("test-suite"));
}

#[sqlx::test(migrations = "./migrations")]
async fn test_duplicate_event_id_fails_fast(pool: PgPool) {
    let event = sample_event("order_placed", 1);
    seed_event(&pool, &event).await;

    let publisher = QueuePublisher::new(Arc::new(QueueMetrics::new()));
    let mut tx = pool.begin().await.unwrap();
    let result = publisher.publish(&mut tx, &event).await;
    tx.rollback().await.unwrap();

    match result {
        Err(OutboxError::DuplicateEvent(id)) => assert_eq!(id, event.event_id),
        other => panic!("expected DuplicateEvent, got {other:?}"),
    }

    // The first row is untouched
    let count = QueueEntry::count_by_status(&pool, EntryStatus::New)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_rejected_publish_writes_nothing(pool: PgPool) {
    let mut event = sample_event("order_placed", 1);
    event.event_name = "NotSnakeCase".to_string();

    let publisher = QueuePublisher::new(Arc::new(QueueMetrics::new()));
    let mut tx = pool.begin().await.unwrap();
    let result = publisher.publish(&mut tx, &event).await;
    assert!(matches!(result, Err(OutboxError::PublishValidation(_))));
    tx.commit().await.unwrap();

    let count = QueueEntry::count_by_status(&pool, EntryStatus::New)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_claim_transitions_and_orders_by_id(pool: PgPool) {
    let first = seed_event(&pool, &sample_event("order_placed", 1)).await;
    let second = seed_event(&pool, &sample_event("order_updated", 1)).await;
    let third = seed_event(&pool, &sample_event("order_cancelled", 1)).await;

    let claimed = QueueEntry::claim_batch(&pool, 2, 5, "worker-a", Utc::now())
        .await
        .unwrap();

    assert_eq!(claimed.len(), 2);
    assert_eq!(claimed[0].id, first.id);
    assert_eq!(claimed[1].id, second.id);
    for entry in &claimed {
        assert_eq!(entry.status, "processing");
        assert_eq!(entry.attempt_count, 1);
        assert_eq!(entry.locked_by.as_deref(), Some("worker-a"));
        assert!(entry.locked_at.is_some());
    }

    // The third entry is still claimable by someone else
    let rest = QueueEntry::claim_batch(&pool, 10, 5, "worker-b", Utc::now())
        .await
        .unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].id, third.id);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_claim_skips_ineligible_rows(pool: PgPool) {
    let future_retry = seed_event(&pool, &sample_event("order_placed", 1)).await;
    let exhausted = seed_event(&pool, &sample_event("order_updated", 1)).await;
    let in_progress = seed_event(&pool, &sample_event("order_cancelled", 1)).await;
    let eligible = seed_event(&pool, &sample_event("order_archived", 1)).await;

    sqlx::query("UPDATE outbox_entries SET status = 'failed', next_attempt_at = $2 WHERE id = $1")
        .bind(future_retry.id)
        .bind(Utc::now() + ChronoDuration::hours(1))
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("UPDATE outbox_entries SET status = 'failed', attempt_count = 5 WHERE id = $1")
        .bind(exhausted.id)
        .execute(&pool)
        .await
        .unwrap();
    common::force_processing(&pool, in_progress.id, Utc::now(), "other-worker").await;

    let claimed = QueueEntry::claim_batch(&pool, 10, 5, "worker-a", Utc::now())
        .await
        .unwrap();

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, eligible.id);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_claim_zero_batch_is_empty(pool: PgPool) {
    seed_event(&pool, &sample_event("order_placed", 1)).await;

    let claimed = QueueEntry::claim_batch(&pool, 0, 5, "worker-a", Utc::now())
        .await
        .unwrap();
    assert!(claimed.is_empty());

    let claimed = QueueEntry::claim_batch(&pool, -4, 5, "worker-a", Utc::now())
        .await
        .unwrap();
    assert!(claimed.is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn test_concurrent_claims_never_share_a_row(pool: PgPool) {
    let mut seeded = HashSet::new();
    for i in 0..12 {
        let entry = seed_event(&pool, &sample_event(&format!("event_{i}"), 1)).await;
        seeded.insert(entry.id);
    }

    let claims = (0..4).map(|i| {
        let pool = pool.clone();
        let worker_id = format!("worker-{i}");
        async move { QueueEntry::claim_batch(&pool, 5, 5, &worker_id, Utc::now()).await }
    });

    let results = join_all(claims).await;

    let mut claimed_ids = Vec::new();
    for result in results {
        for entry in result.unwrap() {
            claimed_ids.push(entry.id);
        }
    }

    let unique: HashSet<_> = claimed_ids.iter().copied().collect();
    assert_eq!(
        unique.len(),
        claimed_ids.len(),
        "a row was claimed by two workers: {claimed_ids:?}"
    );
    assert_eq!(unique, seeded);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_outcome_writes_are_conditional(pool: PgPool) {
    let entry = seed_event(&pool, &sample_event("order_placed", 1)).await;

    // Not yet PROCESSING: both writes are no-ops
    assert_eq!(QueueEntry::mark_done(&pool, entry.id, Utc::now()).await.unwrap(), 0);
    assert_eq!(
        QueueEntry::mark_failed(&pool, entry.id, Utc::now(), "boom", Utc::now())
            .await
            .unwrap(),
        0
    );

    let claimed = QueueEntry::claim_batch(&pool, 1, 5, "worker-a", Utc::now())
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);

    assert_eq!(QueueEntry::mark_done(&pool, entry.id, Utc::now()).await.unwrap(), 1);

    // Terminal now: the late loser of an outcome race affects nothing
    assert_eq!(QueueEntry::mark_done(&pool, entry.id, Utc::now()).await.unwrap(), 0);
    assert_eq!(
        QueueEntry::mark_failed(&pool, entry.id, Utc::now(), "late timeout", Utc::now())
            .await
            .unwrap(),
        0
    );

    let done = fetch_entry(&pool, entry.id).await;
    assert_eq!(done.status, "done");
    assert!(done.locked_at.is_none());
    assert!(done.locked_by.is_none());
    assert!(done.last_error.is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn test_mark_failed_records_backoff_and_truncates_error(pool: PgPool) {
    let entry = seed_event(&pool, &sample_event("order_placed", 1)).await;
    QueueEntry::claim_batch(&pool, 1, 5, "worker-a", Utc::now())
        .await
        .unwrap();

    let next_attempt_at = Utc::now() + ChronoDuration::seconds(30);
    let huge_error = "x".repeat(5000);
    let affected =
        QueueEntry::mark_failed(&pool, entry.id, next_attempt_at, &huge_error, Utc::now())
            .await
            .unwrap();
    assert_eq!(affected, 1);

    let failed = fetch_entry(&pool, entry.id).await;
    assert_eq!(failed.status, "failed");
    assert_eq!(failed.attempt_count, 1);
    assert!(failed.locked_at.is_none());
    assert!(failed.locked_by.is_none());
    assert_eq!(failed.last_error.as_ref().unwrap().len(), 2000);
    assert!((failed.next_attempt_at - next_attempt_at).num_milliseconds().abs() < 10);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_find_by_event_id(pool: PgPool) {
    let event = sample_event("order_placed", 1);
    let entry = seed_event(&pool, &event).await;

    let found = QueueEntry::find_by_event_id(&pool, event.event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, entry.id);

    let missing = QueueEntry::find_by_event_id(&pool, Uuid::new_v4())
        .await
        .unwrap();
    assert!(missing.is_none());
}
