//! Configuration types and loading for passwd-cache.
//!
//! Configuration is loaded from `~/.config/passwd-cache/config.toml`.
//!
//! # Error Handling
//!
//! - If the config file doesn't exist, default values are returned.
//! - If the config file exists but is invalid, an error is returned (fail fast).
//!
//! # Example Configuration
//!
//! ```toml
//! [cache]
//! grace_period = 10           # seconds a TTL entry survives its last use
//! cleanup_interval = 60       # seconds between purges of expired entries
//!
//! [dialog]
//! timeout = 0                 # seconds before a dialog counts as rejected, 0 = never
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::types::optional_secs;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Cache lifetime settings.
    pub cache: CacheConfig,

    /// Dialog settings.
    pub dialog: DialogConfig,
}

/// Cache lifetime settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds a time-limited entry stays valid after its last use.
    pub grace_period: u64,

    /// Seconds between periodic purges of expired entries.
    pub cleanup_interval: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            grace_period: 10,
            cleanup_interval: 60,
        }
    }
}

/// Dialog settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DialogConfig {
    /// Seconds before an unanswered dialog counts as rejected. `0` disables.
    pub timeout: u64,
}

impl Config {
    /// Returns the default configuration file path.
    ///
    /// Returns `~/.config/passwd-cache/config.toml` using `dirs::config_dir()`,
    /// or `None` if the config directory cannot be determined.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("passwd-cache").join("config.toml"))
    }

    /// Load configuration from the default path.
    ///
    /// - Returns `Ok(Config::default())` if no config file exists.
    /// - Returns `Err` if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Grace period of time-limited cache entries.
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.cache.grace_period)
    }

    /// Interval between purges of expired entries. Never zero.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cache.cleanup_interval.max(1))
    }

    /// Dialog timeout, if one is configured.
    pub fn dialog_timeout(&self) -> Option<Duration> {
        optional_secs(self.dialog.timeout)
    }
}

/// Default daemon socket path.
///
/// `$XDG_RUNTIME_DIR/passwd-cache/socket`, or `/tmp/passwd-cache-$UID/socket`
/// when no runtime directory is available.
pub fn default_socket_path() -> PathBuf {
    if let Some(runtime_dir) = dirs::runtime_dir() {
        runtime_dir.join("passwd-cache").join("socket")
    } else {
        // SAFETY: getuid() is always safe to call
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/passwd-cache-{}/socket", uid))
    }
}
