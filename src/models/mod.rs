//! Data layer: the durable queue table and its status state machine.

pub mod entry_status;
pub mod queue_entry;

pub use entry_status::EntryStatus;
pub use queue_entry::{NewQueueEntry, QueueEntry, MAX_ERROR_TEXT_CHARS, STALE_LOCK_ERROR};
