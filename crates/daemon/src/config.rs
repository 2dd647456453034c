// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration.
//!
//! Read from `config.toml` in the user's config directory (or `--config` /
//! `STINT_CONFIG`). A missing file means defaults; the remote path has no
//! default and must be set before syncing.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use stint_core::RetryPolicy;
use stint_sync::ExecutorConfig;

use crate::env;
use crate::error::{Error, Result};

const CONFIG_FILE_NAME: &str = "config.toml";
const APP_DIR_NAME: &str = "stint";
const DB_FILE_NAME: &str = "stint.db";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Local database (entities and ledger). Defaults to `<state_dir>/stint.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    /// Directory for the log, lock and pid files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Where the shared remote database lives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncSettings {
    /// Identifies this device in versions. Must differ between devices.
    #[serde(default = "default_node_id")]
    pub node_id: u32,
    /// Seconds between periodic cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Upper bound on a single remote call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Quiet period after the last local edit before a cycle starts.
    #[serde(default = "default_edit_quiet_ms")]
    pub edit_quiet_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    /// Fraction of each delay that may be shaved off at random.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_node_id() -> u32 {
    1
}

fn default_interval_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_edit_quiet_ms() -> u64 {
    1500
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_max_delay_secs() -> u64 {
    900
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            node_id: default_node_id(),
            interval_secs: default_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            edit_quiet_ms: default_edit_quiet_ms(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            jitter: default_jitter(),
        }
    }
}

impl Config {
    /// Loads and validates the config at `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => {
                return Err(Error::Config(format!("failed to read {}: {}", path.display(), e)))
            }
        };
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.node_id == 0 {
            return Err(Error::Config("sync.node_id must be greater than 0".to_string()));
        }
        if self.sync.interval_secs == 0 {
            return Err(Error::Config("sync.interval_secs must be greater than 0".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be greater than 0".to_string()));
        }
        if self.retry.base_delay_ms == 0 {
            return Err(Error::Config("retry.base_delay_ms must be greater than 0".to_string()));
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(Error::Config(format!(
                "retry.jitter must be in [0, 1), got {}",
                self.retry.jitter
            )));
        }
        Ok(())
    }

    /// Directory for daemon files: config, then `STINT_STATE_DIR`, then the
    /// XDG state directory.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        if let Some(dir) = env::state_dir() {
            return dir;
        }
        if let Some(dir) = env::xdg_state_home() {
            return dir.join(APP_DIR_NAME);
        }
        dirs::home_dir()
            .map(|h| h.join(".local/state").join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(".local/state").join(APP_DIR_NAME))
    }

    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| self.state_dir().join(DB_FILE_NAME))
    }

    pub fn remote_path(&self) -> Result<&Path> {
        self.remote.path.as_deref().ok_or_else(|| {
            Error::Config("no remote configured\n  hint: set `path` under [remote]".to_string())
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_secs(self.retry.max_delay_secs),
            jitter: self.retry.jitter,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig { request_timeout: Duration::from_secs(self.sync.request_timeout_secs) }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    pub fn edit_quiet(&self) -> Duration {
        Duration::from_millis(self.sync.edit_quiet_ms)
    }
}

/// `--config`, then `STINT_CONFIG`, then `<config_dir>/stint/config.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = env::config_path() {
        return path;
    }
    dirs::config_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".config").join(APP_DIR_NAME))
        .join(CONFIG_FILE_NAME)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
