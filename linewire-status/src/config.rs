//! Daemon configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via LINEWIRE_CONFIG)
//! 3. Environment variables

use linewire_client::Target;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// MPD now-playing watcher.
    pub mpd: MpdConfig,
    /// NUT UPS poller.
    pub nut: NutConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("LINEWIRE_CONFIG") {
            Ok(path) => match Self::from_file(&path) {
                Err(ConfigError::Io(path, e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!("Config file {} not found, using defaults", path.display());
                    Self::default()
                }
                result => result?,
            },
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        self.mpd.apply_env_overrides();
        self.nut.apply_env_overrides();
    }

    /// Rejects values that would stall or spin the reconnect timers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mpd.reconnect.validate()?;
        if self.nut.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "nut.interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// MPD connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MpdConfig {
    pub enabled: bool,
    /// Host name, or a socket path if it contains a `/`.
    pub address: String,
    /// Port number or service name.
    pub service: String,
    pub password: Option<String>,
    pub reconnect: ReconnectConfig,
}

impl Default for MpdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: "localhost".to_string(),
            service: "6600".to_string(),
            password: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl MpdConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(address) = std::env::var("LINEWIRE_MPD_ADDRESS") {
            self.address = address;
        }
        if let Ok(service) = std::env::var("LINEWIRE_MPD_SERVICE") {
            self.service = service;
        }
        if let Ok(password) = std::env::var("LINEWIRE_MPD_PASSWORD") {
            self.password = (!password.is_empty()).then_some(password);
        }
    }

    pub fn target(&self) -> Target {
        Target::parse(&self.address, &self.service)
    }
}

/// Backoff between MPD reconnection attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay_ms == 0 {
            return Err(ConfigError::Validation(
                "mpd.reconnect.initial_delay_ms must be positive".to_string(),
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::Validation(
                "mpd.reconnect.max_delay_ms is below initial_delay_ms".to_string(),
            ));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(ConfigError::Validation(
                "mpd.reconnect.multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// NUT polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NutConfig {
    pub enabled: bool,
    pub address: String,
    pub service: String,
    /// Seconds between polls. A poll still running at the next tick has
    /// timed out.
    pub interval_secs: u64,
    /// Load percentage from which the load is shown.
    pub load_threshold: u64,
    /// Nominal output in watts, for UPS units that do not report it.
    pub load_power: Option<u64>,
}

impl Default for NutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "localhost".to_string(),
            service: "3493".to_string(),
            interval_secs: 10,
            load_threshold: 50,
            load_power: None,
        }
    }
}

impl NutConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("LINEWIRE_NUT_ENABLED") {
            self.enabled = env_flag(&enabled);
        }
        if let Ok(address) = std::env::var("LINEWIRE_NUT_ADDRESS") {
            self.address = address;
        }
        if let Ok(service) = std::env::var("LINEWIRE_NUT_SERVICE") {
            self.service = service;
        }
    }

    pub fn target(&self) -> Target {
        Target::tcp(&self.address, &self.service)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    Parse(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
