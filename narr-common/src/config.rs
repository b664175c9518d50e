//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the job root folder
pub const ROOT_FOLDER_ENV: &str = "NARR_ROOT_FOLDER";

/// Logging section of the TOML config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file; stderr when absent
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// State store tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Superseded snapshots to keep (default: 10, at least 1)
    #[serde(default = "default_backup_count")]
    pub backup_count: usize,

    /// How long a writer waits for the lock before failing (default: 10000 ms)
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Age after which a lock is considered abandoned (default: 600 s)
    #[serde(default = "default_lock_stale_secs")]
    pub lock_stale_secs: u64,

    /// Lock polling interval while waiting (default: 25 ms)
    #[serde(default = "default_lock_poll_ms")]
    pub lock_poll_ms: u64,
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_secs)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms.max(1))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backup_count: default_backup_count(),
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_stale_secs: default_lock_stale_secs(),
            lock_poll_ms: default_lock_poll_ms(),
        }
    }
}

fn default_backup_count() -> usize {
    10
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

fn default_lock_stale_secs() -> u64 {
    600
}

fn default_lock_poll_ms() -> u64 {
    25
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. `NARR_ROOT_FOLDER` environment variable
/// 3. `root_folder` from the TOML config
/// 4. OS-dependent default
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml_value: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    default_root_folder()
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("narr"))
        .unwrap_or_else(|| PathBuf::from("./narr_data"))
}

/// Default config file location (`<config_dir>/narr/narr.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("narr").join("narr.toml"))
}

/// Load a TOML config file into `T`
///
/// A missing file yields `T::default()` with a warning so that a fresh
/// install starts with compiled defaults.
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        tracing::warn!(path = %path.display(), "Config file not found, using defaults");
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Write a TOML config atomically (temp file + rename)
pub fn write_toml_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
