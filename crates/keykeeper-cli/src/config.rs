//! Configuration loading

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use keykeeper_serial::transport::{DEFAULT_BAUD_RATE, DEFAULT_DEVICE};
use keykeeper_serial::{DEFAULT_RECONNECT_DELAY, DEFAULT_SENTINEL_TIMEOUT, SerialConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialSection,
    #[serde(default)]
    pub database: DatabaseSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SerialSection {
    /// Console device of the central
    #[serde(default = "default_device")]
    pub device: PathBuf,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Pause between a lost connection and the next attempt
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Bound on waiting for an identity line or a `done`
    #[serde(default = "default_sentinel_timeout_ms")]
    pub sentinel_timeout_ms: u64,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud_rate: default_baud_rate(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            sentinel_timeout_ms: default_sentinel_timeout_ms(),
        }
    }
}

impl SerialSection {
    pub fn port(&self) -> SerialConfig {
        SerialConfig::new(self.device.clone()).baud_rate(self.baud_rate)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn sentinel_timeout(&self) -> Duration {
        Duration::from_millis(self.sentinel_timeout_ms)
    }
}

fn default_device() -> PathBuf {
    PathBuf::from(DEFAULT_DEVICE)
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_millis() as u64
}

fn default_sentinel_timeout_ms() -> u64 {
    DEFAULT_SENTINEL_TIMEOUT.as_millis() as u64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    /// Credential database file
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("keykeeper.json")
}

/// Load configuration from `path`, falling back to defaults if it does not exist.
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
