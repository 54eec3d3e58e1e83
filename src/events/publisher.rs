//! # Queue Publisher
//!
//! Write-side entry point of the outbox. `publish` takes the caller's open
//! transaction, so the queue row and the business-state change it describes
//! commit or roll back together. The transactional-outbox guarantee is
//! enforced by the signature, not by convention.

use std::sync::Arc;

use sqlx::{Postgres, Transaction};
use tracing::{debug, instrument, warn};

use crate::error::{OutboxError, Result};
use crate::events::envelope::{is_snake_case_name, EventEnvelope};
use crate::metrics::QueueMetrics;
use crate::models::{NewQueueEntry, QueueEntry};

/// Postgres unique-violation SQLSTATE, used to detect duplicate event ids.
const UNIQUE_VIOLATION: &str = "23505";

/// Validates and inserts new queue entries inside the caller's transaction.
#[derive(Clone)]
pub struct QueuePublisher {
    metrics: Arc<QueueMetrics>,
}

impl QueuePublisher {
    pub fn new(metrics: Arc<QueueMetrics>) -> Self {
        Self { metrics }
    }

    /// Validate `event` and insert it as a NEW entry.
    ///
    /// On validation failure nothing is written and the error is typed so the
    /// caller's transaction can roll back. A duplicate `event_id` fails fast
    /// with [`OutboxError::DuplicateEvent`] rather than silently overwriting.
    #[instrument(skip(self, tx, event), fields(event_id = %event.event_id, event_name = %event.event_name))]
    pub async fn publish(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &EventEnvelope,
    ) -> Result<QueueEntry> {
        self.metrics.record_publish_attempt();

        if let Err(e) = validate_event(event) {
            self.metrics.record_publish_error();
            warn!(error = %e, "rejecting invalid event at publish");
            return Err(e);
        }

        let new_entry = NewQueueEntry {
            event_id: event.event_id,
            event_name: event.event_name.clone(),
            schema_version: event.schema_version,
            payload: event.payload.clone(),
            occurred_at: event.occurred_at,
            request_id: event.request_id.clone(),
            published_by: event.published_by.clone(),
        };

        let entry = QueueEntry::insert(&mut *tx, new_entry).await.map_err(|e| {
            self.metrics.record_publish_error();
            if is_unique_violation(&e) {
                warn!(event_id = %event.event_id, "duplicate event id rejected");
                OutboxError::DuplicateEvent(event.event_id)
            } else {
                OutboxError::Database(e)
            }
        })?;

        self.metrics.record_publish_success();
        debug!(
            entry_id = entry.id,
            schema_version = entry.schema_version,
            "event queued"
        );

        Ok(entry)
    }
}

/// Field validation for a publish call; performs no I/O.
pub fn validate_event(event: &EventEnvelope) -> Result<()> {
    if event.event_id.is_nil() {
        return Err(OutboxError::PublishValidation(
            "event_id cannot be the nil UUID".to_string(),
        ));
    }
    if event.event_name.trim().is_empty() {
        return Err(OutboxError::PublishValidation(
            "event_name cannot be blank".to_string(),
        ));
    }
    if !is_snake_case_name(&event.event_name) {
        return Err(OutboxError::PublishValidation(format!(
            "event_name must be snake_case: {}",
            event.event_name
        )));
    }
    if event.schema_version <= 0 {
        return Err(OutboxError::PublishValidation(format!(
            "schema_version must be positive, got {}",
            event.schema_version
        )));
    }
    Ok(())
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| code == UNIQUE_VIOLATION)
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn valid_event() -> EventEnvelope {
        EventEnvelope::new("order_placed", 1, json!({"order_id": 1}))
    }

    #[test]
    fn test_valid_event_passes() {
        assert!(validate_event(&valid_event()).is_ok());
    }

    #[test]
    fn test_nil_event_id_rejected() {
        let event = valid_event().with_event_id(Uuid::nil());
        assert!(matches!(
            validate_event(&event),
            Err(OutboxError::PublishValidation(_))
        ));
    }

    #[test]
    fn test_bad_names_rejected() {
        for name in ["", "  ", "OrderPlaced", "order-placed", "_order", "a__b"] {
            let mut event = valid_event();
            event.event_name = name.to_string();
            assert!(
                validate_event(&event).is_err(),
                "expected rejection for {name:?}"
            );
        }
    }

    #[test]
    fn test_non_positive_version_rejected() {
        for version in [0, -1] {
            let mut event = valid_event();
            event.schema_version = version;
            assert!(validate_event(&event).is_err());
        }
    }
}
