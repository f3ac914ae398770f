//! Scheduler configuration (`[scheduler]` table of weft.toml)
//!
//! Every field has a default, so an empty document is a valid configuration.
//! Durations are stored as whole milliseconds to keep the TOML flat.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Number of carrier threads (default: CPU count)
    pub carrier_pool_size: usize,

    /// Maximum number of Ready Tasks in the run queue (None = unbounded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_run_queue_depth: Option<usize>,

    /// Pinned blocks at least this long are logged at warn level (0 = all)
    pub pinning_log_threshold_ms: u64,

    /// Number of threads running offloaded file/network I/O
    pub io_pool_size: usize,

    /// How often the health check samples pinned carriers
    pub pinned_check_interval_ms: u64,

    /// A carrier pinned longer than this while Tasks are queued is reported
    pub pinned_stall_threshold_ms: u64,

    /// How long shutdown waits for live Tasks before cancelling them
    pub shutdown_grace_ms: u64,

    /// Maximum retained pinning events (None = keep all)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinning_event_capacity: Option<usize>,

    /// Carrier threads are named `{prefix}-{id}`
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            carrier_pool_size: cpus,
            max_run_queue_depth: None,
            pinning_log_threshold_ms: 0,
            io_pool_size: cpus.max(4),
            pinned_check_interval_ms: 100,
            pinned_stall_threshold_ms: 1000,
            shutdown_grace_ms: 5000,
            pinning_event_capacity: None,
            thread_name_prefix: "weft-carrier".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Default configuration with a fixed carrier count
    pub fn with_carriers(carrier_pool_size: usize) -> Self {
        Self {
            carrier_pool_size,
            ..Self::default()
        }
    }

    /// Set the run queue bound
    pub fn max_run_queue_depth(mut self, depth: usize) -> Self {
        self.max_run_queue_depth = Some(depth);
        self
    }

    /// Set the pinning log threshold
    pub fn pinning_log_threshold(mut self, threshold: Duration) -> Self {
        self.pinning_log_threshold_ms = threshold.as_millis() as u64;
        self
    }

    /// Set the stall threshold of the pinned-carrier health check
    pub fn pinned_stall_threshold(mut self, threshold: Duration) -> Self {
        self.pinned_stall_threshold_ms = threshold.as_millis() as u64;
        self
    }

    /// Parse a configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.carrier_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "carrier_pool_size must be at least 1".to_string(),
            ));
        }
        if self.io_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "io_pool_size must be at least 1".to_string(),
            ));
        }
        if self.max_run_queue_depth == Some(0) {
            return Err(ConfigError::Invalid(
                "max_run_queue_depth must be at least 1 when set".to_string(),
            ));
        }
        if self.pinned_check_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "pinned_check_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.pinning_event_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "pinning_event_capacity must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pinning_log_threshold_duration(&self) -> Duration {
        Duration::from_millis(self.pinning_log_threshold_ms)
    }

    pub fn pinned_check_interval(&self) -> Duration {
        Duration::from_millis(self.pinned_check_interval_ms)
    }

    pub fn pinned_stall_threshold_duration(&self) -> Duration {
        Duration::from_millis(self.pinned_stall_threshold_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
