//! Client configuration
//!
//! Read from `config.toml` in the platform config directory, or from the
//! file named by `POINTROOM_CONFIG`. Every key is optional; a missing file
//! means defaults.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use pointroom_net::{MonitorConfig, DEFAULT_JOIN_BASE};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "POINTROOM_CONFIG";

const DB_FILE: &str = "pointroom.db";
const CONFIG_FILE: &str = "config.toml";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Could not determine data directory")]
    NoDataDir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// SQLite file; defaults to the platform data directory
    pub database_path: Option<PathBuf>,
    /// Name to join rooms under when none is given
    pub display_name: Option<String>,
    pub join_base_url: String,
    pub check_interval_ms: u64,
    pub retry_delay_ms: u64,
    /// `tracing` filter used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let monitor = MonitorConfig::default();
        Self {
            database_path: None,
            display_name: None,
            join_base_url: DEFAULT_JOIN_BASE.to_string(),
            check_interval_ms: monitor.check_interval.as_millis() as u64,
            retry_delay_ms: monitor.retry_delay.as_millis() as u64,
            log_filter: "info".to_string(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("app", "pointroom", "pointroom")
}

/// Where the config file is looked up: the override if set, else the
/// platform config directory
pub fn config_path(override_path: Option<OsString>) -> Option<PathBuf> {
    match override_path {
        Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE)),
    }
}

impl ClientConfig {
    /// Load from the default location
    pub fn load() -> Result<Self, ConfigError> {
        match config_path(std::env::var_os(CONFIG_ENV)) {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load a file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file; using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval_ms == 0 {
            return Err(ConfigError::Invalid("check_interval_ms must be positive".into()));
        }
        if self.retry_delay_ms == 0 {
            return Err(ConfigError::Invalid("retry_delay_ms must be positive".into()));
        }
        if self.join_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("join_base_url is empty".into()));
        }
        Ok(())
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            check_interval: Duration::from_millis(self.check_interval_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    /// Configured database file, or the default under the data directory
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let dirs = project_dirs().ok_or(ConfigError::NoDataDir)?;
        Ok(dirs.data_dir().join(DB_FILE))
    }
}
