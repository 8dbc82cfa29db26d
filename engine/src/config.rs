//! Engine configuration.

use crate::record::{AUDIT_LOG_RETENTION, RESTORE_POINT_RETENTION};
use std::env;
use std::time::Duration;

/// Tunables for the sync engine and its stores.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Quiet period after the last queued change before auto-sync fires
    pub debounce: Duration,
    /// Periodic auto-sync interval; `None` disables it
    pub auto_sync_interval: Option<Duration>,
    /// Restore points kept per scope
    pub restore_point_retention: usize,
    /// Audit entries kept per scope
    pub audit_log_retention: usize,
    /// Backoff for retrying failed automatic syncs
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            auto_sync_interval: None,
            restore_point_retention: RESTORE_POINT_RETENTION,
            audit_log_retention: AUDIT_LOG_RETENTION,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `LEDGER_SYNC_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, "LEDGER_SYNC_DEBOUNCE_MS")? {
            config.debounce = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "LEDGER_SYNC_INTERVAL_SECS")? {
            config.auto_sync_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(n) = parse_var::<usize>(&lookup, "LEDGER_SYNC_RESTORE_POINTS")? {
            config.restore_point_retention = n;
        }
        if let Some(n) = parse_var::<usize>(&lookup, "LEDGER_SYNC_AUDIT_ENTRIES")? {
            config.audit_log_retention = n;
        }
        if let Some(n) = parse_var::<u32>(&lookup, "LEDGER_SYNC_RETRY_ATTEMPTS")? {
            config.retry.max_attempts = n;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the auto-sync interval. A zero interval disables auto-sync.
    pub fn with_auto_sync_interval(mut self, interval: Duration) -> Self {
        self.auto_sync_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Sets the restore point retention.
    pub fn with_restore_point_retention(mut self, retention: usize) -> Self {
        self.restore_point_retention = retention;
        self
    }

    /// Sets the audit log retention.
    pub fn with_audit_log_retention(mut self, retention: usize) -> Self {
        self.audit_log_retention = retention;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.restore_point_retention == 0 {
            return Err(ConfigError::Invalid {
                key: "LEDGER_SYNC_RESTORE_POINTS",
                reason: "must be at least 1".into(),
            });
        }
        if self.audit_log_retention == 0 {
            return Err(ConfigError::Invalid {
                key: "LEDGER_SYNC_AUDIT_ENTRIES",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Exponential backoff for automatic retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first failure; 0 disables retrying
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), or `None` when exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = self.multiplier.max(1.0).powi(attempt as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Some(Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64())))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has an invalid value '{value}'")]
    Unparsable { key: &'static str, value: String },

    #[error("{key} {reason}")]
    Invalid { key: &'static str, reason: String },
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Unparsable { key, value }),
        None => Ok(None),
    }
}
