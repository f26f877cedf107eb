//! Controller configuration
//!
//! Loaded from a JSON file. Every field is optional; missing fields take
//! the defaults below.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{ConfigError, ConfigResult};
use crate::api::{ObjectMeta, PromotionRef, DEFAULT_ARGOCD_NAMESPACE, SHARD_LABEL_KEY};
use crate::workqueue::ItemExponentialBackoff;

/// Jitter applied on top of each rate-limited delay.
const RATE_LIMIT_JITTER: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Concurrent reconcile workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Delay before re-checking a Promotion whose mechanics are still running
    #[serde(default = "default_requeue_interval_ms")]
    pub requeue_interval_ms: u64,

    /// First retry delay after a failed reconcile
    #[serde(default = "default_rate_limit_base_delay_ms")]
    pub rate_limit_base_delay_ms: u64,

    /// Retry delay ceiling
    #[serde(default = "default_rate_limit_max_delay_ms")]
    pub rate_limit_max_delay_ms: u64,

    /// Attempts at a status write before giving up on conflicts
    #[serde(default = "default_status_update_retries")]
    pub status_update_retries: u32,

    /// Namespace assumed for Argo CD Applications that name none
    #[serde(default = "default_argocd_namespace")]
    pub argocd_namespace: String,

    /// Only handle Promotions carrying this shard label value
    #[serde(default)]
    pub shard: Option<String>,

    /// Log filter directives
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Write logs as JSON lines
    #[serde(default)]
    pub log_json: bool,
}

fn default_workers() -> usize {
    4
}
fn default_requeue_interval_ms() -> u64 {
    5_000
}
fn default_rate_limit_base_delay_ms() -> u64 {
    5
}
fn default_rate_limit_max_delay_ms() -> u64 {
    60_000
}
fn default_status_update_retries() -> u32 {
    5
}
fn default_argocd_namespace() -> String {
    DEFAULT_ARGOCD_NAMESPACE.to_string()
}
fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            requeue_interval_ms: default_requeue_interval_ms(),
            rate_limit_base_delay_ms: default_rate_limit_base_delay_ms(),
            rate_limit_max_delay_ms: default_rate_limit_max_delay_ms(),
            status_update_retries: default_status_update_retries(),
            argocd_namespace: default_argocd_namespace(),
            shard: None,
            log_filter: default_log_filter(),
            log_json: false,
        }
    }
}

impl ControllerConfig {
    /// Load and validate configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: ControllerConfig = serde_json::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be > 0".to_string()));
        }

        if self.requeue_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "requeue_interval_ms must be > 0".to_string(),
            ));
        }

        if self.rate_limit_max_delay_ms < self.rate_limit_base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "rate_limit_max_delay_ms ({}) must be >= rate_limit_base_delay_ms ({})",
                self.rate_limit_max_delay_ms, self.rate_limit_base_delay_ms
            )));
        }

        if self.status_update_retries == 0 {
            return Err(ConfigError::Invalid(
                "status_update_retries must be > 0".to_string(),
            ));
        }

        if self.argocd_namespace.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "argocd_namespace must not be empty".to_string(),
            ));
        }

        if matches!(&self.shard, Some(shard) if shard.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "shard must not be empty when set".to_string(),
            ));
        }

        Ok(())
    }

    pub fn requeue_interval(&self) -> Duration {
        Duration::from_millis(self.requeue_interval_ms)
    }

    /// Per-key backoff for failed reconciles.
    pub fn rate_limiter(&self) -> ItemExponentialBackoff<PromotionRef> {
        ItemExponentialBackoff::new(
            Duration::from_millis(self.rate_limit_base_delay_ms),
            Duration::from_millis(self.rate_limit_max_delay_ms),
        )
        .with_jitter(RATE_LIMIT_JITTER)
    }

    /// Whether this controller instance handles the object.
    ///
    /// An unsharded controller handles everything.
    pub fn is_responsible_for(&self, meta: &ObjectMeta) -> bool {
        match &self.shard {
            Some(shard) => meta.label(SHARD_LABEL_KEY) == Some(shard.as_str()),
            None => true,
        }
    }
}
