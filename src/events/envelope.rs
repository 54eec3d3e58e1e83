//! Event envelope: the value callers publish and handlers receive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One domain event, addressed by `(event_name, schema_version)`.
///
/// `request_id` and `published_by` are explicit provenance parameters carried
/// from the triggering request context by the caller; the queue never reads
/// ambient state to fill them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Caller-assigned unique id; re-publishing the same id fails fast
    pub event_id: Uuid,
    /// snake_case event name, e.g. `catalog_item_created`
    pub event_name: String,
    /// Positive payload schema version; selects handlers together with the name
    pub schema_version: i32,
    /// Business event time
    pub occurred_at: DateTime<Utc>,
    /// Opaque versioned body, interpreted only by handlers
    pub payload: serde_json::Value,
    pub request_id: Option<String>,
    pub published_by: Option<String>,
}

impl EventEnvelope {
    pub fn new(
        event_name: impl Into<String>,
        schema_version: i32,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_name: event_name.into(),
            schema_version,
            occurred_at: Utc::now(),
            payload,
            request_id: None,
            published_by: None,
        }
    }

    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = event_id;
        self
    }

    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_published_by(mut self, published_by: impl Into<String>) -> Self {
        self.published_by = Some(published_by.into());
        self
    }
}

/// Check the `^[a-z0-9]+(_[a-z0-9]+)*$` event-name shape.
pub(crate) fn is_snake_case_name(name: &str) -> bool {
    if name.is_empty() || name.starts_with('_') || name.ends_with('_') || name.contains("__") {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
