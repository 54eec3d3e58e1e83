//! # Retention Cleanup
//!
//! Purges terminal rows once they age out of their retention windows: DONE
//! rows after the done window, FAILED rows after the (typically longer)
//! failed window. Deletes run in bounded batches with a short pause in
//! between so the job never holds long-running locks against a busy table,
//! and a shutdown request between batches stops the pass early with the
//! partial result logged rather than raised.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use crate::config::RetentionConfig;
use crate::error::Result;
use crate::metrics::QueueMetrics;
use crate::models::{EntryStatus, QueueEntry};

/// Pause between delete batches.
const BATCH_PAUSE: Duration = Duration::from_millis(100);

/// Fallback when the configured delete batch size is not positive.
const DEFAULT_DELETE_BATCH_SIZE: i64 = 500;

/// Result of one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub done_deleted: u64,
    pub failed_deleted: u64,
    /// Pass ended early because shutdown was requested.
    pub interrupted: bool,
}

/// Periodic terminal-row purge.
pub struct RetentionCleanupJob {
    db: PgPool,
    config: RetentionConfig,
    metrics: Arc<QueueMetrics>,
}

impl RetentionCleanupJob {
    pub fn new(db: PgPool, config: RetentionConfig, metrics: Arc<QueueMetrics>) -> Self {
        Self {
            db,
            config,
            metrics,
        }
    }

    /// Run on the configured schedule until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval_ms,
            done_retention_days = self.config.done_retention_days,
            failed_retention_days = self.config.failed_retention_days,
            "retention cleanup job started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once(&shutdown).await {
                Ok(summary) if summary.interrupted => {
                    info!(
                        done_deleted = summary.done_deleted,
                        failed_deleted = summary.failed_deleted,
                        "retention cleanup interrupted, partial result"
                    );
                }
                Ok(summary) => {
                    if summary.done_deleted > 0 || summary.failed_deleted > 0 {
                        info!(
                            done_deleted = summary.done_deleted,
                            failed_deleted = summary.failed_deleted,
                            "retention cleanup pass completed"
                        );
                    } else {
                        debug!("retention cleanup found nothing to delete");
                    }
                }
                Err(e) => error!(error = %e, "retention cleanup pass failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("retention cleanup job stopped");
    }

    /// One cleanup pass: loop both statuses until their backlogs are
    /// exhausted or shutdown is requested between batches.
    #[instrument(skip(self, shutdown))]
    pub async fn run_once(&self, shutdown: &watch::Receiver<bool>) -> Result<CleanupSummary> {
        let batch_size = if self.config.delete_batch_size > 0 {
            self.config.delete_batch_size
        } else {
            DEFAULT_DELETE_BATCH_SIZE
        };

        let now = Utc::now();
        let done_cutoff = now - chrono::Duration::days(self.config.done_retention_days);
        let failed_cutoff = now - chrono::Duration::days(self.config.failed_retention_days);

        let mut summary = CleanupSummary::default();
        let mut done_exhausted = false;
        let mut failed_exhausted = false;

        while !(done_exhausted && failed_exhausted) {
            if *shutdown.borrow() {
                summary.interrupted = true;
                return Ok(summary);
            }

            if !done_exhausted {
                let deleted =
                    QueueEntry::delete_older_than(&self.db, EntryStatus::Done, done_cutoff, batch_size)
                        .await?;
                summary.done_deleted += deleted;
                self.metrics.record_retention_deleted(deleted);
                done_exhausted = deleted < batch_size as u64;
            }

            if !failed_exhausted {
                let deleted = QueueEntry::delete_older_than(
                    &self.db,
                    EntryStatus::Failed,
                    failed_cutoff,
                    batch_size,
                )
                .await?;
                summary.failed_deleted += deleted;
                self.metrics.record_retention_deleted(deleted);
                failed_exhausted = deleted < batch_size as u64;
            }

            if !(done_exhausted && failed_exhausted) {
                tokio::time::sleep(BATCH_PAUSE).await;
            }
        }

        Ok(summary)
    }
}
