use uuid::Uuid;

use crate::dispatch::consumer::DispatchError;

/// Crate-wide error type.
///
/// Publish validation and duplicate-id errors are never retried: they fail the
/// caller's transaction synchronously. Everything that happens after an entry
/// is durably queued converges on the FAILED-with-backoff path instead of
/// surfacing here (see [`crate::dispatch`]).
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("publish validation error: {0}")]
    PublishValidation(String),

    #[error("duplicate event id: {0}")]
    DuplicateEvent(Uuid),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

pub type Result<T> = std::result::Result<T, OutboxError>;
