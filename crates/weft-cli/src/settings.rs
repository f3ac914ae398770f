//! weft.toml loading
//!
//! ```toml
//! [scheduler]
//! carrier_pool_size = 4
//! pinning_log_threshold_ms = 10
//!
//! [log]
//! level = "info"
//! ```

use crate::logger::LogLevel;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use weft_core::SchedulerConfig;

/// Config file looked up in the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "weft.toml";

/// `[log]` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    pub level: LogLevel,
}

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub scheduler: SchedulerConfig,
    pub log: LogSettings,
}

/// Values given on the command line; each one wins over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub carriers: Option<usize>,
    pub max_queue_depth: Option<usize>,
    pub log_level: Option<LogLevel>,
}

impl Settings {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        Ok(settings)
    }

    /// Read `path`, or `weft.toml` in `cwd` if it exists, or fall back to defaults
    pub fn resolve(path: Option<&Path>, cwd: &Path) -> anyhow::Result<Self> {
        let file: Option<PathBuf> = match path {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let candidate = cwd.join(DEFAULT_CONFIG_FILE);
                candidate.is_file().then_some(candidate)
            }
        };

        match file {
            Some(file) => {
                let content = std::fs::read_to_string(&file)
                    .with_context(|| format!("failed to read {}", file.display()))?;
                Self::from_toml_str(&content)
                    .with_context(|| format!("failed to parse {}", file.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply command-line values and validate the result
    pub fn apply(mut self, overrides: &Overrides) -> anyhow::Result<Self> {
        if let Some(carriers) = overrides.carriers {
            self.scheduler.carrier_pool_size = carriers;
        }
        if let Some(depth) = overrides.max_queue_depth {
            self.scheduler.max_run_queue_depth = Some(depth);
        }
        if let Some(level) = overrides.log_level {
            self.log.level = level;
        }
        self.scheduler.validate()?;
        Ok(self)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
