//! Configuration structures for run loops and messaging primitives.
//!
//! Supports TOML deserialization with defaults matching the built-in
//! constants, so an empty file yields a working configuration.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default slot count for queues and buses (one slot is always kept free).
pub const DEFAULT_CAPACITY: usize = 128;

/// Default upper bound on how long a run loop sleeps between wakes.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(1);

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Run-loop scheduler settings.
    pub run_loop: RunLoopConfig,

    /// Queue and bus sizing.
    pub messaging: MessagingConfig,

    /// Tick metrics collection.
    pub metrics: MetricsConfig,
}

/// How an entry that fell behind by more than one period is re-armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CatchUpPolicy {
    /// Add the period to the (possibly negative) countdown. A late entry fires
    /// once per wake until it has caught up, preserving its long-run rate.
    #[default]
    CatchUp,
    /// Re-arm onto the next future point of the entry's phase grid, dropping
    /// the periods that were missed.
    SkipMissed,
}

/// Run-loop scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunLoopConfig {
    /// Name used for the thread and in diagnostics only.
    pub name: String,

    /// Longest sleep between wakes, even with nothing due.
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,

    /// Re-arm policy for late entries.
    pub catch_up: CatchUpPolicy,
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            name: String::from("run-loop"),
            max_wait: DEFAULT_MAX_WAIT,
            catch_up: CatchUpPolicy::CatchUp,
        }
    }
}

/// Messaging primitive sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Slot count of synchronized queues.
    pub queue_capacity: usize,

    /// Slot count of message buses.
    pub bus_capacity: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_CAPACITY,
            bus_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable tick metrics collection.
    pub enabled: bool,

    /// Number of tick-duration samples retained.
    pub histogram_size: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            histogram_size: 1024,
        }
    }
}

impl CoreConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check values that parse but cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] describing the first bad value.
    pub fn validate(&self) -> CoreResult<()> {
        if self.run_loop.max_wait.is_zero() {
            return Err(CoreError::Config("run_loop.max_wait must be non-zero".into()));
        }
        if self.messaging.queue_capacity < 2 {
            return Err(CoreError::Config(format!(
                "messaging.queue_capacity must be at least 2, got {}",
                self.messaging.queue_capacity
            )));
        }
        if self.messaging.bus_capacity < 2 {
            return Err(CoreError::Config(format!(
                "messaging.bus_capacity must be at least 2, got {}",
                self.messaging.bus_capacity
            )));
        }
        if self.metrics.enabled && self.metrics.histogram_size == 0 {
            return Err(CoreError::Config(
                "metrics.histogram_size must be non-zero when metrics are enabled".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
