//! Configuration traits and utilities.

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::device::DeviceConfig;
use crate::error::{BridgeError, Result};
use crate::session::SessionOptions;
use crate::{LoggingConfig, ZenohConfig};

/// Interval between device status reports when a bridge does not set one.
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(2);

/// Trait for bridge configuration types.
///
/// Implement this trait for your bridge's configuration struct to get
/// automatic loading, validation, and access to common config fields.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use tagbridge_framework::{BridgeConfig, DeviceConfig, LoggingConfig, ZenohConfig};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyBridgeConfig {
///     pub zenoh: ZenohConfig,
///     pub logging: LoggingConfig,
///     pub key_prefix: String,
///     pub devices: Vec<DeviceConfig>,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     fn zenoh(&self) -> &ZenohConfig {
///         &self.zenoh
///     }
///
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn key_prefix(&self) -> &str {
///         &self.key_prefix
///     }
///
///     fn devices(&self) -> &[DeviceConfig] {
///         &self.devices
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Get the Zenoh configuration.
    fn zenoh(&self) -> &ZenohConfig;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Get the key expression prefix for this bridge.
    fn key_prefix(&self) -> &str;

    /// Devices declared in the configuration file.
    fn devices(&self) -> &[DeviceConfig];

    /// Options shared by every device session.
    fn session_options(&self) -> SessionOptions {
        SessionOptions::default().with_key_prefix(self.key_prefix())
    }

    /// How often the device status report is published.
    fn status_interval(&self) -> Duration {
        DEFAULT_STATUS_INTERVAL
    }

    /// Validate the configuration.
    ///
    /// Called automatically after loading. The default checks every device
    /// and rejects duplicate identifiers.
    fn validate(&self) -> Result<()> {
        validate_devices(self.devices())
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from JSON5 text and validate it.
    fn parse(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)?;

        config.validate()?;

        Ok(config)
    }
}

/// Validate a list of devices: each must be valid and ids must be unique.
pub fn validate_devices(devices: &[DeviceConfig]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();

    for device in devices {
        device.validate()?;

        if !seen.insert(device.id.as_str()) {
            return Err(BridgeError::validation(format!(
                "Duplicate device id '{}'",
                device.id
            )));
        }
    }

    Ok(())
}
