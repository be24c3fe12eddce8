//! Controller configuration.
//!
//! Loaded from TOML; every field has a default so partial files are fine.

use crate::backoff::Backoff;
use crate::error::{ControllerError, Result};
use convoy_dispatch::DispatchConfig;
use convoy_revision::Retention;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the reconciliation controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers.
    pub workers: usize,

    /// Unreferenced revisions kept per application; zero or negative keeps all.
    pub revision_history_limit: i64,

    /// Interval between resyncs of a healthy application; zero disables resync.
    pub resync_interval_secs: u64,

    /// Capacity of the GC signal channel.
    pub gc_queue_capacity: usize,

    /// Retry backoff.
    pub backoff: BackoffConfig,

    /// Dispatch settings.
    pub dispatch: DispatchSettings,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            revision_history_limit: 10,
            resync_interval_secs: 300,
            gc_queue_capacity: 1024,
            backoff: BackoffConfig::default(),
            dispatch: DispatchSettings::default(),
        }
    }
}

/// Exponential backoff for failed reconciles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub base_delay_ms: u64,

    /// Upper bound for any delay.
    pub max_delay_ms: u64,

    /// Consecutive failures after which `Stalled` is reported.
    pub stalled_threshold: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 300_000,
            stalled_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Timeout for dispatching to a single cluster.
    pub target_timeout_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            target_timeout_ms: 30_000,
        }
    }
}

impl ControllerConfig {
    /// Parse a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ControllerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ControllerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ControllerError::Config("workers must be at least 1".into()));
        }
        if self.gc_queue_capacity == 0 {
            return Err(ControllerError::Config(
                "gc_queue_capacity must be at least 1".into(),
            ));
        }
        if self.backoff.base_delay_ms == 0 {
            return Err(ControllerError::Config(
                "backoff.base_delay_ms must be positive".into(),
            ));
        }
        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(ControllerError::Config(format!(
                "backoff.max_delay_ms ({}) is below base_delay_ms ({})",
                self.backoff.max_delay_ms, self.backoff.base_delay_ms
            )));
        }
        if self.backoff.stalled_threshold == 0 {
            return Err(ControllerError::Config(
                "backoff.stalled_threshold must be at least 1".into(),
            ));
        }
        if self.dispatch.target_timeout_ms == 0 {
            return Err(ControllerError::Config(
                "dispatch.target_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn retention(&self) -> Retention {
        Retention::from_config(self.revision_history_limit)
    }

    /// Resync interval, `None` when disabled
    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff.base_delay_ms),
            Duration::from_millis(self.backoff.max_delay_ms),
        )
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            target_timeout: Duration::from_millis(self.dispatch.target_timeout_ms),
        }
    }
}
