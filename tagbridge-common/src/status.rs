//! Device status types for operator-facing consumers.
//!
//! These are the read-only views the bridge exposes about each device session.
//! They are plain data so dashboards can deserialize them without the framework.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tag::TagSnapshot;

/// Point-in-time status of one device session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Unique device identifier.
    pub device_id: String,
    /// Display name.
    pub name: String,
    /// Controller address.
    pub host: String,
    /// Slot/route selector.
    pub slot: u8,
    /// Configured tag names.
    pub tags: Vec<String>,
    /// Poll interval in seconds.
    pub poll_interval_secs: f64,
    /// Whether the read loop is active.
    pub running: bool,
    /// Whether the last read cycle reached the controller.
    pub connected: bool,
    /// Most recent read batch.
    #[serde(default)]
    pub last_data: TagSnapshot,
    /// Last recorded error, cleared by a successful read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Number of payloads successfully published.
    pub message_count: u64,
    /// Time of the last cycle that produced readings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

impl DeviceStatus {
    /// Running and reaching the controller.
    ///
    /// A running device can be unhealthy: `running` only says the loop is active.
    pub fn is_healthy(&self) -> bool {
        self.running && self.connected
    }
}

/// Periodic report of every registered device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicesReport {
    /// Bridge name.
    pub bridge: String,
    /// Report time.
    pub timestamp: DateTime<Utc>,
    /// Devices in registration order.
    pub devices: Vec<DeviceStatus>,
}

impl DevicesReport {
    pub fn new(bridge: impl Into<String>, devices: Vec<DeviceStatus>) -> Self {
        Self {
            bridge: bridge.into(),
            timestamp: Utc::now(),
            devices,
        }
    }

    /// Devices whose loop is active.
    pub fn running(&self) -> usize {
        self.devices.iter().filter(|d| d.running).count()
    }

    /// Devices whose last cycle reached the controller.
    pub fn connected(&self) -> usize {
        self.devices.iter().filter(|d| d.connected).count()
    }
}
