//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/trackline/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/trackline/` (~/.config/trackline/)
//! - Data: `$XDG_DATA_HOME/trackline/` (~/.local/share/trackline/)
//! - State/Logs: `$XDG_STATE_HOME/trackline/` (~/.local/state/trackline/)

use crate::error::{Error, Result};
use crate::flush::FlushMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Delivery and flush scheduling
    #[serde(default)]
    pub flush: FlushConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Local storage overrides
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Local storage configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct StorageConfig {
    /// Override for the event database location
    pub database_path: Option<PathBuf>,
}

/// Delivery configuration consumed by the flush pipeline.
///
/// The credential is sent verbatim in the `Authorization` header, so it
/// carries its own scheme (for example `"Token abc123"`).
#[derive(Debug, Deserialize, Clone)]
pub struct FlushConfig {
    /// Collection server base URL (e.g., `https://api.example.com`)
    pub base_url: Option<String>,

    /// Project token substituted into endpoint paths
    pub project_token: Option<String>,

    /// Value of the `Authorization` header
    pub authorization: Option<String>,

    /// Maximum delivery attempts per event before it is dropped
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,

    /// When flush passes are scheduled
    #[serde(default)]
    pub flush_mode: FlushMode,

    /// Seconds between passes in periodic mode
    #[serde(default = "default_flush_period")]
    pub flush_period_secs: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            project_token: None,
            authorization: None,
            max_tries: default_max_tries(),
            flush_mode: FlushMode::default(),
            flush_period_secs: default_flush_period(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_max_tries() -> u32 {
    10
}

fn default_flush_period() -> u64 {
    60 * 60
}

fn default_timeout() -> u64 {
    30
}

/// Fully specified delivery destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub base_url: String,
    pub project_token: String,
    pub authorization: String,
}

impl FlushConfig {
    /// Check if delivery is fully configured
    pub fn is_ready(&self) -> bool {
        self.base_url.is_some() && self.project_token.is_some() && self.authorization.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        match self.base_url.as_deref() {
            None => {
                return Err(Error::Config("flush.base_url is required".to_string()));
            }
            Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                return Err(Error::Config(format!(
                    "flush.base_url must be an http(s) URL, got {:?}",
                    url
                )));
            }
            Some(_) => {}
        }
        if self.project_token.as_deref().map_or(true, str::is_empty) {
            return Err(Error::Config(
                "flush.project_token is required".to_string(),
            ));
        }
        if self.authorization.is_none() {
            return Err(Error::Config(
                "flush.authorization is required".to_string(),
            ));
        }
        if self.max_tries == 0 {
            return Err(Error::Config(
                "flush.max_tries must be at least 1".to_string(),
            ));
        }
        if self.flush_period_secs == 0 {
            return Err(Error::Config(
                "flush.flush_period_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Validated delivery destination
    pub fn target(&self) -> Result<DeliveryTarget> {
        self.validate()?;
        Ok(DeliveryTarget {
            base_url: self.base_url.clone().unwrap_or_default(),
            project_token: self.project_token.clone().unwrap_or_default(),
            authorization: self.authorization.clone().unwrap_or_default(),
        })
    }

    /// Interval between periodic passes
    pub fn flush_period(&self) -> Duration {
        Duration::from_secs(self.flush_period_secs)
    }

    /// Request timeout handed to the sender
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/trackline/config.toml` (~/.config/trackline/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("trackline").join("config.toml")
    }

    /// Returns the data directory path (for the event database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("trackline")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("trackline")
    }

    /// Returns the default database file path
    ///
    /// `$XDG_DATA_HOME/trackline/events.db` (~/.local/share/trackline/events.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("events.db")
    }

    /// Database path honoring `[storage] database_path`
    pub fn resolved_database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(Self::database_path)
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("trackline.log")
    }
}
