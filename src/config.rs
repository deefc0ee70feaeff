//! Configuration file loading and validation.
//!
//! The file is JSON5 (plain JSON works too) with camelCase keys:
//!
//! ```json5
//! {
//!   mqttBrokerUrl: "mqtt://localhost:1883",
//!   mqttOptions: { username: "bridge", password: "secret" },
//!   knownDevices: { "aa:bb:cc:dd:ee:ff": "kitchen" },
//!   onlyKnownDevices: false,
//!   bleTimeout: 10,
//! }
//! ```

use crate::alias::{AliasMap, KnownDevices};
use crate::mac_address::MacAddress;
use serde::Deserialize;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Path used when no `--config` argument is given.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Seconds without a discovery event before the wireless stack is considered
/// broken.
pub const DEFAULT_BLE_TIMEOUT_SECS: u64 = 10;

/// Errors from loading the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    NotFound { path: String },
    #[error("Failed to read configuration: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] json5::Error),
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Broker credentials.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MqttCredentials {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// Bridge configuration, read once before scanning starts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Broker URL including scheme, e.g. `mqtt://localhost:1883`
    pub mqtt_broker_url: String,
    #[serde(default)]
    pub mqtt_options: Option<MqttCredentials>,
    /// Lower-case device address to alias
    #[serde(default)]
    pub known_devices: AliasMap,
    /// Only process devices listed in `known_devices`
    #[serde(default)]
    pub only_known_devices: bool,
    /// Stall timeout in seconds, 0 disables it
    #[serde(default = "default_ble_timeout")]
    pub ble_timeout: u64,
}

fn default_ble_timeout() -> u64 {
    DEFAULT_BLE_TIMEOUT_SECS
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;

        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt_broker_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "mqttBrokerUrl must not be empty".into(),
            ));
        }

        for address in self.known_devices.keys() {
            MacAddress::parse_canonical(address).map_err(|e| {
                ConfigError::Validation(format!("knownDevices key '{address}': {e}"))
            })?;
        }

        Ok(())
    }

    pub fn known_devices(&self) -> KnownDevices {
        KnownDevices::new(self.known_devices.clone())
    }

    /// Stall timeout, `None` when disabled.
    pub fn stall_timeout(&self) -> Option<Duration> {
        (self.ble_timeout > 0).then(|| Duration::from_secs(self.ble_timeout))
    }
}
