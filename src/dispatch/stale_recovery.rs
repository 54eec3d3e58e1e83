//! # Stale Processing Recovery
//!
//! Crash recovery for abandoned claims. A worker that dies mid-processing
//! leaves its rows PROCESSING with a lock nobody will release; this job
//! bounds that window to the configured processing timeout by requeueing
//! such rows as FAILED with immediate eligibility. The attempt count is not
//! touched: the claim that locked the row already counted the attempt.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use crate::config::StaleRecoveryConfig;
use crate::error::Result;
use crate::metrics::QueueMetrics;
use crate::models::QueueEntry;

/// Periodic requeue of entries whose PROCESSING lock outlived the timeout.
pub struct StaleRecoveryJob {
    db: PgPool,
    config: StaleRecoveryConfig,
    metrics: Arc<QueueMetrics>,
}

impl StaleRecoveryJob {
    pub fn new(db: PgPool, config: StaleRecoveryConfig, metrics: Arc<QueueMetrics>) -> Self {
        Self {
            db,
            config,
            metrics,
        }
    }

    /// Run on the configured interval until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval_ms,
            processing_timeout_ms = self.config.processing_timeout_ms,
            "stale recovery job started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.run_once().await {
                error!(error = %e, "stale recovery pass failed");
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

        info!("stale recovery job stopped");
    }

    /// One recovery pass; returns the number of requeued entries.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<u64> {
        let now = Utc::now();
        let locked_before = now - self.config.processing_timeout();

        let recovered = QueueEntry::requeue_stale_processing(&self.db, locked_before, now).await?;

        if recovered > 0 {
            self.metrics.record_stale_recovered(recovered);
            info!(
                recovered = recovered,
                locked_before = %locked_before,
                "requeued stale processing entries"
            );
        } else {
            debug!("no stale processing entries found");
        }

        Ok(recovered)
    }
}
