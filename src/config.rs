//! Configuration management for floodgate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{FloodgateError, Result};

/// Configuration for a [`RateLimiter`](crate::ratelimit::RateLimiter).
///
/// All parameters are supplied once at construction time and are immutable
/// afterwards. The defaults match a login-brute-force profile: 5 attempts,
/// refilled in full every minute, with idle buckets dropped after 10 minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum tokens a bucket can hold
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Tokens credited back per refill period
    #[serde(default = "default_refill_tokens")]
    pub refill_tokens: u32,

    /// Refill period in seconds
    #[serde(default = "default_refill_period_secs")]
    pub refill_period_secs: u64,

    /// Idle time in seconds before a bucket may be evicted
    #[serde(default = "default_expire_after_access_secs")]
    pub expire_after_access_secs: u64,

    /// Soft cap on concurrently tracked keys
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_tokens: default_refill_tokens(),
            refill_period_secs: default_refill_period_secs(),
            expire_after_access_secs: default_expire_after_access_secs(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_capacity() -> u32 {
    5
}

fn default_refill_tokens() -> u32 {
    5
}

fn default_refill_period_secs() -> u64 {
    60
}

fn default_expire_after_access_secs() -> u64 {
    600
}

fn default_max_entries() -> usize {
    10_000
}

impl LimiterConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: LimiterConfig = serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse limiter config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Every parameter must be positive; the refill math divides by the
    /// refill period.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(FloodgateError::Config("capacity must be > 0".into()));
        }
        if self.refill_tokens == 0 {
            return Err(FloodgateError::Config("refill_tokens must be > 0".into()));
        }
        if self.refill_period_secs == 0 {
            return Err(FloodgateError::Config(
                "refill_period_secs must be > 0".into(),
            ));
        }
        if self.expire_after_access_secs == 0 {
            return Err(FloodgateError::Config(
                "expire_after_access_secs must be > 0".into(),
            ));
        }
        if self.max_entries == 0 {
            return Err(FloodgateError::Config("max_entries must be > 0".into()));
        }
        Ok(())
    }

    /// The refill period as a [`Duration`].
    pub fn refill_period(&self) -> Duration {
        Duration::from_secs(self.refill_period_secs)
    }

    /// The idle-expiry window as a [`Duration`].
    pub fn expire_after_access(&self) -> Duration {
        Duration::from_secs(self.expire_after_access_secs)
    }
}
