//! Device configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tagbridge_common::topic::{KEY_PREFIX, data_topic, default_topic_prefix};
use tagbridge_common::{PublishFormat, normalize_tags};

use zenoh::key_expr::KeyExpr;

use crate::error::{BridgeError, Result};

/// Poll interval used when a device does not specify one.
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 5.0;

/// Shortest poll interval a device may use.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for a single controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique, immutable identifier.
    pub id: String,

    /// Display name (also the payload HWID fallback).
    pub name: String,

    /// Controller address (IP or hostname).
    pub host: String,

    /// Processor slot / route selector.
    #[serde(default)]
    pub slot: u8,

    /// Tag names to read each cycle.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Poll interval in seconds (> 0).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,

    /// Topic prefix; readings go to `<topic_prefix>/data`.
    #[serde(default)]
    pub topic_prefix: Option<String>,

    /// Payload encoding.
    #[serde(default)]
    pub format: PublishFormat,

    /// Hardware identifier used as the payload HWID.
    #[serde(default)]
    pub hardware_id: Option<String>,

    /// Whether the device may be polled at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether the device starts polling when the bridge loads it.
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

fn default_poll_interval() -> f64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

impl DeviceConfig {
    /// Create a device with default settings and no tags.
    pub fn new(id: impl Into<String>, name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            host: host.into(),
            slot: 0,
            tags: Vec::new(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            topic_prefix: None,
            format: PublishFormat::default(),
            hardware_id: None,
            enabled: true,
            auto_start: true,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_poll_interval(mut self, secs: f64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = Some(prefix.into());
        self
    }

    pub fn with_format(mut self, format: PublishFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_hardware_id(mut self, hwid: impl Into<String>) -> Self {
        self.hardware_id = Some(hwid.into());
        self
    }

    pub fn with_slot(mut self, slot: u8) -> Self {
        self.slot = slot;
        self
    }

    /// Tag names trimmed, without blanks or duplicates, in configured order.
    pub fn normalized_tags(&self) -> Vec<String> {
        normalize_tags(&self.tags)
    }

    /// Poll interval as a duration, never shorter than [`MIN_POLL_INTERVAL`].
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval_secs)
            .map(|d| d.max(MIN_POLL_INTERVAL))
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_SECS))
    }

    /// Identifier placed in payloads: hardware id, falling back to the name.
    pub fn hwid(&self) -> &str {
        match self.hardware_id.as_deref() {
            Some(hwid) if !hwid.trim().is_empty() => hwid,
            _ => &self.name,
        }
    }

    /// Topic this device publishes to, using `key_prefix/<name>` when no prefix is set.
    pub fn data_topic(&self, key_prefix: &str) -> String {
        match self.topic_prefix.as_deref() {
            Some(prefix) if !prefix.trim().is_empty() => data_topic(prefix),
            _ => data_topic(&default_topic_prefix(key_prefix, &self.name)),
        }
    }

    /// Whether the device should start when loaded.
    pub fn should_auto_start(&self) -> bool {
        self.enabled && self.auto_start
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(BridgeError::validation("Device id cannot be empty"));
        }

        if self.name.trim().is_empty() {
            return Err(BridgeError::validation(format!(
                "Device '{}': name cannot be empty",
                self.id
            )));
        }

        if self.host.trim().is_empty() {
            return Err(BridgeError::validation(format!(
                "Device '{}': host cannot be empty",
                self.id
            )));
        }

        let min_secs = MIN_POLL_INTERVAL.as_secs_f64();
        if !self.poll_interval_secs.is_finite() || self.poll_interval_secs < min_secs {
            return Err(BridgeError::validation(format!(
                "Device '{}': poll_interval_secs must be >= {} (got {})",
                self.id, min_secs, self.poll_interval_secs
            )));
        }

        if let Some(prefix) = &self.topic_prefix {
            if prefix.contains(['#', '+', '*', '$', '?']) {
                return Err(BridgeError::validation(format!(
                    "Device '{}': topic_prefix '{}' contains wildcard characters",
                    self.id, prefix
                )));
            }
        }

        // The name becomes a topic chunk when no prefix is set.
        let topic = self.data_topic(KEY_PREFIX);
        if topic.contains('*') {
            return Err(BridgeError::validation(format!(
                "Device '{}': topic '{}' contains wildcard characters",
                self.id, topic
            )));
        }
        KeyExpr::try_from(topic.as_str()).map_err(|e| {
            BridgeError::validation(format!(
                "Device '{}': invalid topic '{}': {}",
                self.id, topic, e
            ))
        })?;

        Ok(())
    }
}
