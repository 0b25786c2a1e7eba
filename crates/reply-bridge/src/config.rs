//! Bridge configuration with validation.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// What the correlation store does with a value stored for a key whose
/// waiter already gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum LateArrivalPolicy {
    /// Drop the value and log a warning.
    #[default]
    Drop,
    /// Keep the value for a bounded grace period so a retrying poller on the
    /// same key can still pick it up.
    BufferWithGracePeriod {
        #[serde(with = "humantime_serde")]
        grace: Duration,
    },
}

/// What the correlation store does when a key already holds an unconsumed
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Replace the buffered value.
    #[default]
    Overwrite,
    /// Keep the first value and reject the new one.
    Reject,
}

/// Configuration of one bridge endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Default call timeout (default: 5s)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Rescan interval for selective receive (default: 500ms)
    #[serde(with = "humantime_serde")]
    pub polling_interval: Duration,
    /// Header carrying the correlation key
    pub correlation_header_name: String,
    /// Handling of values stored after their waiter timed out
    pub late_arrival_policy: LateArrivalPolicy,
    /// Handling of a second store on an unconsumed key
    pub duplicate_policy: DuplicatePolicy,
    /// Unconsumed values are evicted after this long (default: 60s)
    #[serde(with = "humantime_serde")]
    pub entry_ttl: Duration,
    /// Opportunistic garbage collection cadence (default: 10s)
    #[serde(with = "humantime_serde")]
    pub gc_interval: Duration,
    /// How long a timed-out key is remembered to detect late arrivals (default: 60s)
    #[serde(with = "humantime_serde")]
    pub tombstone_ttl: Duration,
    /// Channel capacity, unbounded when `None`
    pub channel_capacity: Option<usize>,
}

impl BridgeConfig {
    /// Default call timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

    /// Default selective receive polling interval.
    pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(500);

    /// Default correlation header.
    pub const DEFAULT_CORRELATION_HEADER: &'static str = bridge_types::MessageHeaders::ID;

    /// Defaults overlaid with environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BRIDGE_TIMEOUT_MS`: Default call timeout in milliseconds
    /// - `BRIDGE_POLLING_INTERVAL_MS`: Selective receive polling interval
    /// - `BRIDGE_CORRELATION_HEADER`: Correlation header name
    /// - `BRIDGE_CHANNEL_CAPACITY`: Channel capacity (unbounded if unset)
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            timeout: env_millis("BRIDGE_TIMEOUT_MS").unwrap_or(defaults.timeout),
            polling_interval: env_millis("BRIDGE_POLLING_INTERVAL_MS")
                .unwrap_or(defaults.polling_interval),
            correlation_header_name: env::var("BRIDGE_CORRELATION_HEADER")
                .unwrap_or(defaults.correlation_header_name),
            channel_capacity: env::var("BRIDGE_CHANNEL_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(defaults.channel_capacity),
            ..defaults
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("timeout cannot be 0".into()));
        }

        if self.polling_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "polling_interval cannot be 0".into(),
            ));
        }

        if self.correlation_header_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "correlation_header_name cannot be empty".into(),
            ));
        }

        if self.channel_capacity == Some(0) {
            return Err(ConfigError::InvalidLimit(
                "channel_capacity cannot be 0".into(),
            ));
        }

        if self.entry_ttl.is_zero() || self.tombstone_ttl.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "entry_ttl and tombstone_ttl cannot be 0".into(),
            ));
        }

        if let LateArrivalPolicy::BufferWithGracePeriod { grace } = self.late_arrival_policy {
            if grace.is_zero() {
                return Err(ConfigError::InvalidTimeout(
                    "late arrival grace period cannot be 0".into(),
                ));
            }
        }

        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            timeout: Self::DEFAULT_TIMEOUT,
            polling_interval: Self::DEFAULT_POLLING_INTERVAL,
            correlation_header_name: Self::DEFAULT_CORRELATION_HEADER.to_string(),
            late_arrival_policy: LateArrivalPolicy::Drop,
            duplicate_policy: DuplicatePolicy::Overwrite,
            entry_ttl: Duration::from_secs(60),
            gc_interval: Duration::from_secs(10),
            tombstone_ttl: Duration::from_secs(60),
            channel_capacity: None,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Invalid timeout or interval value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn env_millis(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            // Plain numbers are milliseconds, like the timeout options
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid duration format")
        }
    }
}
