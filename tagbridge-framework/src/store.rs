//! Device persistence.
//!
//! The bridge reads its device list from a [`DeviceStore`] at startup and
//! reports every read batch back to it. [`MemoryStore`] keeps both in memory.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tagbridge_common::{TagReading, TagSnapshot};

use crate::device::DeviceConfig;
use crate::error::Result;

/// Persistence for device configurations and read results.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// All persisted devices.
    async fn list_all(&self) -> Result<Vec<DeviceConfig>>;

    /// Record the outcome of one read batch.
    async fn record_readings(
        &self,
        device_id: &str,
        snapshot: &TagSnapshot,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Running per-tag statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagStats {
    /// Last successfully read value, rendered as text.
    pub last_value: Option<String>,
    /// Type label of the last value.
    pub data_type: Option<String>,
    /// Time of the last successful read.
    pub last_read: Option<DateTime<Utc>>,
    pub read_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
}

impl TagStats {
    /// Fold one reading into the statistics.
    pub fn record(&mut self, reading: &TagReading, at: DateTime<Utc>) {
        match reading {
            TagReading::Value { value, type_label } => {
                self.last_value = Some(value.to_string());
                self.data_type = Some(type_label.clone());
                self.last_read = Some(at);
                self.read_count += 1;
            }
            TagReading::Error { error } => {
                self.error_count += 1;
                self.last_error = Some(error.clone());
            }
        }
    }
}

/// In-memory [`DeviceStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    devices: RwLock<IndexMap<String, DeviceConfig>>,
    stats: RwLock<HashMap<String, IndexMap<String, TagStats>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with devices.
    pub fn with_devices(devices: impl IntoIterator<Item = DeviceConfig>) -> Self {
        let store = Self::new();
        for device in devices {
            store.upsert(device);
        }
        store
    }

    /// Insert or replace a device.
    pub fn upsert(&self, device: DeviceConfig) {
        self.devices.write().insert(device.id.clone(), device);
    }

    /// Delete a device and its statistics.
    pub fn delete(&self, device_id: &str) -> Option<DeviceConfig> {
        self.stats.write().remove(device_id);
        self.devices.write().shift_remove(device_id)
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceConfig> {
        self.devices.read().get(device_id).cloned()
    }

    /// Statistics per tag for a device, in first-seen order.
    pub fn tag_stats(&self, device_id: &str) -> IndexMap<String, TagStats> {
        self.stats
            .read()
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn list_all(&self) -> Result<Vec<DeviceConfig>> {
        Ok(self.devices.read().values().cloned().collect())
    }

    async fn record_readings(
        &self,
        device_id: &str,
        snapshot: &TagSnapshot,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut stats = self.stats.write();
        let device = stats.entry(device_id.to_string()).or_default();

        for (tag, reading) in snapshot.iter() {
            device.entry(tag.to_string()).or_default().record(reading, at);
        }

        Ok(())
    }
}
