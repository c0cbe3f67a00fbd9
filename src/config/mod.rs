// src/config/mod.rs

pub mod control;

pub use control::{resolve, ControlOverride, RateLimitControl, DEFAULT_LIMIT_WINDOW_MINUTES};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{RateLimiterError, Result};

/// What to decide when the counter store cannot answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Let the request through without rate limit headers
    FailOpen,
    /// Reject the request with 429
    #[default]
    FailClosed,
}

/// Settings for one rate limit middleware instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Key prefix to use for all keys in storage
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Deadline for each counter store call
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub store_timeout: Duration,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Control applied to every endpoint
    #[serde(default)]
    pub control: ControlOverride,

    /// Per-endpoint overrides keyed by endpoint id
    #[serde(default)]
    pub resources: HashMap<String, ControlOverride>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            store_timeout: default_timeout(),
            failure_policy: FailurePolicy::default(),
            control: ControlOverride::default(),
            resources: HashMap::new(),
        }
    }
}

fn default_key_prefix() -> String {
    "ratelimit".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

impl LimiterConfig {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: LimiterConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit configuration");

        let contents = std::fs::read_to_string(path).map_err(|e| {
            RateLimiterError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }

    /// Reject settings that would only fail once traffic arrives
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() || self.key_prefix.contains(char::is_whitespace) {
            return Err(RateLimiterError::Config(format!(
                "key_prefix must be non-empty and contain no whitespace, got {:?}",
                self.key_prefix
            )));
        }

        if self.store_timeout.is_zero() {
            return Err(RateLimiterError::Config(
                "store_timeout must be greater than zero".to_string(),
            ));
        }

        if self.resources.keys().any(|endpoint| endpoint.is_empty()) {
            return Err(RateLimiterError::Config(
                "resource endpoint ids must be non-empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration for Redis storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Connection timeout
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_timeout: default_conn_timeout(),
        }
    }
}

/// Configuration for in-memory storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum number of entries to store
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Whether to use a background task for expiration
    #[serde(default = "default_use_background_task")]
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            use_background_task: default_use_background_task(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_max_entries() -> usize {
    10_000
}

fn default_use_background_task() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
