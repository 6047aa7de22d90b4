//! Queue configuration.

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

/// Errors raised while loading a [`QueueConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Value out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for a queue manager.
///
/// Durations are expressed in milliseconds when (de)serialized:
///
/// ```json
/// { "name": "uploads", "max_concurrent": 4, "default_timeout_ms": 2000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Name used in log output
    pub name: String,

    /// Max jobs holding a slot at once
    pub max_concurrent: NonZeroUsize,

    /// Timeout for jobs submitted without one (None = wait forever)
    #[serde(rename = "default_timeout_ms", with = "opt_millis")]
    pub default_timeout: Option<Duration>,

    /// Max jobs waiting for a slot (None = unbounded)
    pub max_pending: Option<usize>,

    /// Live zombie count above which the observer is alerted
    pub max_zombies: Option<usize>,

    /// Interval for periodic stats logging (None = disabled)
    #[serde(rename = "log_interval_ms", with = "opt_millis")]
    pub log_interval: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: format!("queue-{}", ulid::Ulid::new()),
            max_concurrent: NonZeroUsize::MIN,
            default_timeout: None,
            max_pending: None,
            max_zombies: None,
            log_interval: None,
        }
    }
}

impl QueueConfig {
    /// Create a default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set max concurrent jobs.
    pub fn with_max_concurrent(mut self, max: NonZeroUsize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the default per-job timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Bound the pending queue.
    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = Some(max);
        self
    }

    /// Set the zombie alert threshold.
    pub fn with_max_zombies(mut self, max: usize) -> Self {
        self.max_zombies = Some(max);
        self
    }

    /// Enable periodic stats logging.
    pub fn with_log_interval(mut self, interval: Duration) -> Self {
        self.log_interval = Some(interval);
        self
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Check value ranges that the type system does not cover.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".to_string()));
        }
        if self.max_pending == Some(0) {
            return Err(ConfigError::Invalid("max_pending must be at least 1".to_string()));
        }
        if self.default_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid("default_timeout_ms must be positive".to_string()));
        }
        if self.log_interval == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid("log_interval_ms must be positive".to_string()));
        }
        Ok(())
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
