//! Configuration for the EtherNet/IP bridge.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use tagbridge_framework::{
    BridgeConfig, BridgeError, DEFAULT_STATUS_INTERVAL, DeviceConfig, LoggingConfig, Qos, Result,
    SessionOptions, ZenohConfig, validate_devices,
};

use crate::simulator::SimulatorConfig;

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnipBridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// EtherNet/IP polling settings
    pub enip: EnipConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// EtherNet/IP polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnipConfig {
    /// Key expression prefix (default: "tagbridge/enip")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Delivery guarantee for tag payloads: 0, 1 or 2 (default: 1)
    #[serde(default)]
    pub qos: Qos,

    /// Controller connection timeout in seconds, capped at 5 (default: 5)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: f64,

    /// Timeout for one batch read in seconds (default: 10)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: f64,

    /// Device status report interval in seconds (default: 2)
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: f64,

    /// Controllers to poll
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    /// Simulated controller settings
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

fn default_key_prefix() -> String {
    "tagbridge/enip".to_string()
}

fn default_connect_timeout() -> f64 {
    5.0
}

fn default_read_timeout() -> f64 {
    10.0
}

fn default_status_interval() -> f64 {
    DEFAULT_STATUS_INTERVAL.as_secs_f64()
}

fn positive_secs(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| BridgeError::validation(format!("{} must be > 0 (got {})", name, secs)))
}

impl BridgeConfig for EnipBridgeConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn key_prefix(&self) -> &str {
        &self.enip.key_prefix
    }

    fn devices(&self) -> &[DeviceConfig] {
        &self.enip.devices
    }

    fn session_options(&self) -> SessionOptions {
        let defaults = SessionOptions::default();
        let enip = &self.enip;

        SessionOptions::default()
            .with_key_prefix(&enip.key_prefix)
            .with_qos(enip.qos)
            .with_connect_timeout(
                positive_secs("connect_timeout_secs", enip.connect_timeout_secs)
                    .unwrap_or(defaults.connect_timeout),
            )
            .with_read_timeout(
                positive_secs("read_timeout_secs", enip.read_timeout_secs)
                    .unwrap_or(defaults.read_timeout),
            )
    }

    fn status_interval(&self) -> Duration {
        positive_secs("status_interval_secs", self.enip.status_interval_secs)
            .unwrap_or(DEFAULT_STATUS_INTERVAL)
    }

    fn validate(&self) -> Result<()> {
        let prefix = self.enip.key_prefix.trim_matches('/');
        if prefix.is_empty() {
            return Err(BridgeError::validation("key_prefix cannot be empty"));
        }
        if prefix.contains(['*', '$', '?', '#']) {
            return Err(BridgeError::validation(format!(
                "key_prefix '{}' contains wildcard characters",
                self.enip.key_prefix
            )));
        }

        positive_secs("connect_timeout_secs", self.enip.connect_timeout_secs)?;
        positive_secs("read_timeout_secs", self.enip.read_timeout_secs)?;
        positive_secs("status_interval_secs", self.enip.status_interval_secs)?;

        validate_devices(&self.enip.devices)?;
        self.enip.simulator.validate()
    }
}
