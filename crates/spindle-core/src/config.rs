//! Runtime configuration.
//!
//! Every field has a serde default, so a TOML file only needs the keys it
//! changes. Front ends layer their own overrides (flags, environment) on top.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::RetryPolicy;

/// Spindle configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpindleConfig {
    /// Backing store address. Only `memory://` is built in.
    #[serde(default = "default_store_url")]
    pub store_url: String,

    /// How long terminal records (and finished queue entries) are kept.
    #[serde(default = "default_result_retention_secs")]
    pub result_retention_secs: u64,

    /// Default lease duration.
    #[serde(default = "default_visibility_timeout_ms")]
    pub visibility_timeout_ms: u64,

    /// Number of concurrent worker slots.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Default max_attempts for submitted jobs.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Fraction of each backoff delay that may be shaved off at random.
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,

    /// Dispatcher reconciliation interval.
    #[serde(default = "default_dispatcher_interval_ms")]
    pub dispatcher_interval_ms: u64,

    /// Retention sweep interval.
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,

    /// How long a worker slot waits on an empty queue before polling again.
    #[serde(default = "default_lease_wait_ms")]
    pub lease_wait_ms: u64,
}

fn default_store_url() -> String {
    "memory://".to_string()
}

fn default_result_retention_secs() -> u64 {
    86_400
}

fn default_visibility_timeout_ms() -> u64 {
    30_000
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    2_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_cap_ms() -> u64 {
    300_000
}

fn default_backoff_jitter() -> f64 {
    0.2
}

fn default_dispatcher_interval_ms() -> u64 {
    1_000
}

fn default_gc_interval_secs() -> u64 {
    60
}

fn default_lease_wait_ms() -> u64 {
    500
}

impl Default for SpindleConfig {
    fn default() -> Self {
        Self {
            store_url: default_store_url(),
            result_retention_secs: default_result_retention_secs(),
            visibility_timeout_ms: default_visibility_timeout_ms(),
            worker_pool_size: default_worker_pool_size(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_cap_ms: default_backoff_cap_ms(),
            backoff_jitter: default_backoff_jitter(),
            dispatcher_interval_ms: default_dispatcher_interval_ms(),
            gc_interval_secs: default_gc_interval_secs(),
            lease_wait_ms: default_lease_wait_ms(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("unsupported store url '{0}' (supported: memory://)")]
    UnsupportedStore(String),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl SpindleConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(invalid("worker_pool_size", "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }
        if self.visibility_timeout_ms == 0 {
            return Err(invalid("visibility_timeout_ms", "must be positive"));
        }
        if self.backoff_base_ms > self.backoff_cap_ms {
            return Err(invalid(
                "backoff_base_ms",
                format!(
                    "base {}ms exceeds cap {}ms",
                    self.backoff_base_ms, self.backoff_cap_ms
                ),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid("backoff_multiplier", "must be a finite value >= 1"));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(invalid("backoff_jitter", "must be within [0, 1]"));
        }
        if self.dispatcher_interval_ms == 0 {
            return Err(invalid("dispatcher_interval_ms", "must be positive"));
        }
        if self.gc_interval_secs == 0 {
            return Err(invalid("gc_interval_secs", "must be positive"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.backoff_base_ms),
            multiplier: self.backoff_multiplier,
            max_delay: Duration::from_millis(self.backoff_cap_ms),
            jitter: self.backoff_jitter,
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn result_retention(&self) -> Duration {
        Duration::from_secs(self.result_retention_secs)
    }

    pub fn dispatcher_interval(&self) -> Duration {
        Duration::from_millis(self.dispatcher_interval_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    pub fn lease_wait(&self) -> Duration {
        Duration::from_millis(self.lease_wait_ms)
    }
}
