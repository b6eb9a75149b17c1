//! Endpoint configuration with validation.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Idle time after which an ephemeral handler may be collected.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Name prefix marking system-generated (ephemeral) handlers.
pub const EPHEMERAL_PREFIX: &str = "temp_fn_";

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("invalid collector setting: {0}")]
    InvalidCollector(String),
}

/// Endpoint configuration.
///
/// Durations serialize as whole milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Timeout applied to calls that do not set their own
    #[serde(with = "duration_ms")]
    pub default_timeout: Duration,
    /// Minimum idle time before an ephemeral handler is collected
    #[serde(with = "duration_ms")]
    pub grace_period: Duration,
    /// Quiet window after the last message before a sweep runs
    #[serde(with = "duration_ms")]
    pub sweep_debounce: Duration,
    /// Prefix for generated handler names
    pub ephemeral_prefix: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            sweep_debounce: DEFAULT_GRACE_PERIOD,
            ephemeral_prefix: EPHEMERAL_PREFIX.to_string(),
        }
    }
}

impl RpcConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "default_timeout cannot be 0".into(),
            ));
        }

        if self.grace_period.is_zero() {
            return Err(ConfigError::InvalidCollector(
                "grace_period cannot be 0".into(),
            ));
        }

        if self.sweep_debounce.is_zero() {
            return Err(ConfigError::InvalidCollector(
                "sweep_debounce cannot be 0".into(),
            ));
        }

        if self.ephemeral_prefix.is_empty() {
            return Err(ConfigError::InvalidCollector(
                "ephemeral_prefix cannot be empty".into(),
            ));
        }

        Ok(())
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_sweep_debounce(mut self, debounce: Duration) -> Self {
        self.sweep_debounce = debounce;
        self
    }

    /// True when `name` carries the ephemeral prefix.
    pub fn is_ephemeral(&self, name: &str) -> bool {
        name.starts_with(&self.ephemeral_prefix)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
