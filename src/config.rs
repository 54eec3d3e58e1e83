//! # Configuration
//!
//! Typed configuration for the outbox queue with environment-variable
//! overrides. Defaults are tuned for a single-process deployment; every knob
//! the dispatcher, recovery, and retention jobs recognize lives here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OutboxError, Result};

/// Top-level configuration for the outbox core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    pub database_url: String,
    /// Identity recorded in `locked_by` for rows claimed by this process.
    pub worker_id: String,
    pub dispatcher: DispatcherConfig,
    pub backoff: BackoffConfig,
    pub recovery: StaleRecoveryConfig,
    pub retention: RetentionConfig,
}

/// Dispatcher poll loop and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Master switch for the dispatcher job-set.
    pub enabled: bool,
    /// Fixed delay between poll ticks (next poll is scheduled only after the
    /// previous one returns).
    pub poll_interval_ms: u64,
    /// Maximum entries claimed per tick, before capacity clamping.
    pub batch_size: i64,
    /// Concurrent in-flight handler executions.
    pub pool_size: usize,
    /// Submissions that may wait for a worker beyond `pool_size`.
    pub queue_capacity: usize,
    /// Rows with `attempt_count >= max_attempts` are never claimed again.
    pub max_attempts: i32,
    /// Per-entry handler timeout. Zero disables the timeout timer.
    pub handler_timeout_ms: u64,
}

/// Exponential backoff between retry attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    /// Must be >= 1.0 so delays never shrink across attempts.
    pub multiplier: f64,
    pub max_ms: u64,
}

/// Stale PROCESSING lock recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaleRecoveryConfig {
    pub interval_ms: u64,
    /// A PROCESSING lock older than this is considered abandoned.
    pub processing_timeout_ms: u64,
}

/// Terminal-row retention cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub interval_ms: u64,
    pub delete_batch_size: i64,
    pub done_retention_days: i64,
    pub failed_retention_days: i64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/outbox_development".to_string(),
            worker_id: format!("outbox-{}", uuid::Uuid::new_v4()),
            dispatcher: DispatcherConfig::default(),
            backoff: BackoffConfig::default(),
            recovery: StaleRecoveryConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 500,
            batch_size: 25,
            pool_size: 8,
            queue_capacity: 16,
            max_attempts: 5,
            handler_timeout_ms: 30_000,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            multiplier: 2.0,
            max_ms: 300_000,
        }
    }
}

impl Default for StaleRecoveryConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            processing_timeout_ms: 300_000,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3_600_000,
            delete_batch_size: 500,
            done_retention_days: 30,
            failed_retention_days: 90,
        }
    }
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// `None` when the timeout timer is disabled.
    pub fn handler_timeout(&self) -> Option<Duration> {
        (self.handler_timeout_ms > 0).then(|| Duration::from_millis(self.handler_timeout_ms))
    }
}

impl StaleRecoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn processing_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.processing_timeout_ms as i64)
    }
}

impl RetentionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl OutboxConfig {
    /// Build a configuration from defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }
        if let Ok(worker_id) = std::env::var("OUTBOX_WORKER_ID") {
            config.worker_id = worker_id;
        }

        override_from_env("OUTBOX_POLL_INTERVAL_MS", &mut config.dispatcher.poll_interval_ms)?;
        override_from_env("OUTBOX_BATCH_SIZE", &mut config.dispatcher.batch_size)?;
        override_from_env("OUTBOX_POOL_SIZE", &mut config.dispatcher.pool_size)?;
        override_from_env("OUTBOX_QUEUE_CAPACITY", &mut config.dispatcher.queue_capacity)?;
        override_from_env("OUTBOX_MAX_ATTEMPTS", &mut config.dispatcher.max_attempts)?;
        override_from_env("OUTBOX_HANDLER_TIMEOUT_MS", &mut config.dispatcher.handler_timeout_ms)?;
        override_from_env("OUTBOX_BACKOFF_INITIAL_MS", &mut config.backoff.initial_ms)?;
        override_from_env("OUTBOX_BACKOFF_MULTIPLIER", &mut config.backoff.multiplier)?;
        override_from_env("OUTBOX_BACKOFF_MAX_MS", &mut config.backoff.max_ms)?;
        override_from_env("OUTBOX_STALE_RECOVERY_INTERVAL_MS", &mut config.recovery.interval_ms)?;
        override_from_env(
            "OUTBOX_PROCESSING_TIMEOUT_MS",
            &mut config.recovery.processing_timeout_ms,
        )?;
        override_from_env(
            "OUTBOX_RETENTION_CLEANUP_INTERVAL_MS",
            &mut config.retention.interval_ms,
        )?;
        override_from_env(
            "OUTBOX_RETENTION_DELETE_BATCH_SIZE",
            &mut config.retention.delete_batch_size,
        )?;
        override_from_env("OUTBOX_DONE_RETENTION_DAYS", &mut config.retention.done_retention_days)?;
        override_from_env(
            "OUTBOX_FAILED_RETENTION_DAYS",
            &mut config.retention.failed_retention_days,
        )?;

        if let Ok(enabled) = std::env::var("OUTBOX_DISPATCHER_ENABLED") {
            config.dispatcher.enabled = enabled.parse().map_err(|e| {
                OutboxError::Configuration(format!("Invalid OUTBOX_DISPATCHER_ENABLED: {e}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.worker_id.trim().is_empty() {
            return Err(OutboxError::Configuration(
                "worker_id cannot be blank".to_string(),
            ));
        }
        if self.dispatcher.pool_size == 0 {
            return Err(OutboxError::Configuration(
                "dispatcher.pool_size must be > 0".to_string(),
            ));
        }
        if self.dispatcher.max_attempts <= 0 {
            return Err(OutboxError::Configuration(
                "dispatcher.max_attempts must be > 0".to_string(),
            ));
        }
        if self.backoff.multiplier < 1.0 {
            return Err(OutboxError::Configuration(format!(
                "backoff.multiplier must be >= 1.0, got {}",
                self.backoff.multiplier
            )));
        }
        if self.backoff.max_ms < self.backoff.initial_ms {
            return Err(OutboxError::Configuration(
                "backoff.max_ms must be >= backoff.initial_ms".to_string(),
            ));
        }
        if self.recovery.processing_timeout_ms == 0 {
            return Err(OutboxError::Configuration(
                "recovery.processing_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn override_from_env<T>(var: &str, target: &mut T) -> Result<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(var) {
        *target = raw
            .parse()
            .map_err(|e| OutboxError::Configuration(format!("Invalid {var}: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = OutboxConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.dispatcher.enabled);
        assert_eq!(config.dispatcher.batch_size, 25);
        assert_eq!(config.backoff.multiplier, 2.0);
        assert_eq!(config.retention.done_retention_days, 30);
        assert_eq!(config.retention.failed_retention_days, 90);
    }

    #[test]
    fn test_handler_timeout_disabled_at_zero() {
        let mut dispatcher = DispatcherConfig::default();
        dispatcher.handler_timeout_ms = 0;
        assert!(dispatcher.handler_timeout().is_none());

        dispatcher.handler_timeout_ms = 250;
        assert_eq!(dispatcher.handler_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let mut config = OutboxConfig::default();
        config.backoff.multiplier = 0.5;
        assert!(config.validate().is_err());

        config.backoff.multiplier = 2.0;
        config.backoff.max_ms = 10;
        config.backoff.initial_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let mut config = OutboxConfig::default();
        config.dispatcher.pool_size = 0;
        assert!(config.validate().is_err());
    }
}
