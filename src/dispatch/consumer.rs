//! # Entry Consumer
//!
//! Dispatches one claimed entry to its registered handlers. Handlers for the
//! entry's `(event_name, schema_version)` run in registration order; the
//! first failure stops the sequence and fails the whole entry, so remaining
//! handlers are not invoked and will run again on the retry. A payload that
//! cannot be interpreted by a handler surfaces the same way as any handler
//! failure, since a schema mismatch may be fixed by a deploy before attempts
//! are exhausted.

use std::sync::Arc;

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::dispatch::claimer::ClaimedEntry;
use crate::events::EventEnvelope;
use crate::registry::HandlerRegistry;

/// Why dispatch of one entry failed. Every variant converges on the same
/// FAILED-with-backoff transition; only the diagnostic differs.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler registered for event type {event_name} v{schema_version}")]
    UnknownEventType {
        event_name: String,
        schema_version: i32,
    },

    #[error(
        "handler '{handler}' failed for entry {entry_id} \
         (event {event_id}, {event_name} v{schema_version}): {cause}"
    )]
    HandlerFailed {
        entry_id: i64,
        event_id: Uuid,
        event_name: String,
        schema_version: i32,
        handler: String,
        cause: anyhow::Error,
    },

    #[error("handler execution for entry {entry_id} timed out after {timeout_ms}ms")]
    Timeout { entry_id: i64, timeout_ms: u64 },

    #[error("worker pool rejected submission of entry {entry_id}")]
    PoolRejected { entry_id: i64 },

    #[error("handler execution for entry {entry_id} panicked: {detail}")]
    Panicked { entry_id: i64, detail: String },
}

/// Resolves and invokes handlers for claimed entries.
pub struct EntryConsumer {
    registry: Arc<HandlerRegistry>,
}

impl EntryConsumer {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `entry` to every handler registered for its exact
    /// `(event_name, schema_version)` pair, in registration order.
    #[instrument(skip(self, entry), fields(entry_id = entry.id, event_name = %entry.event_name))]
    pub async fn handle(&self, entry: &ClaimedEntry) -> Result<(), DispatchError> {
        let descriptors = match self
            .registry
            .handlers_for(&entry.event_name, entry.schema_version)
        {
            Ok(descriptors) => descriptors,
            Err(_) => {
                warn!(
                    event_name = %entry.event_name,
                    schema_version = entry.schema_version,
                    "unknown event type, no handlers registered"
                );
                return Err(DispatchError::UnknownEventType {
                    event_name: entry.event_name.clone(),
                    schema_version: entry.schema_version,
                });
            }
        };

        let envelope = EventEnvelope {
            event_id: entry.event_id,
            event_name: entry.event_name.clone(),
            schema_version: entry.schema_version,
            occurred_at: entry.occurred_at,
            payload: entry.payload.clone(),
            request_id: entry.request_id.clone(),
            published_by: entry.published_by.clone(),
        };

        for descriptor in descriptors {
            descriptor
                .handler
                .handle(&envelope)
                .await
                .map_err(|cause| DispatchError::HandlerFailed {
                    entry_id: entry.id,
                    event_id: entry.event_id,
                    event_name: entry.event_name.clone(),
                    schema_version: entry.schema_version,
                    handler: descriptor.handler_name.clone(),
                    cause,
                })?;

            debug!(handler = %descriptor.handler_name, "handler completed");
        }

        Ok(())
    }
}
