//! Bridge status reporting.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use tagbridge_common::DevicesReport;
use tagbridge_common::topic::{devices_key, status_key};

use crate::Result;
use crate::manager::DeviceManager;
use crate::publisher::{Publisher, Qos};

/// Bridge status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name (e.g., "enip").
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    /// Current status ("running", "offline", "error").
    pub status: String,
    /// Additional metadata (protocol-specific).
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    /// Create a new status with "running" state.
    pub fn running(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_state(bridge, version, "running")
    }

    /// Create a status with "offline" state.
    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_state(bridge, version, "offline")
    }

    /// Create a status with "error" state.
    pub fn error(
        bridge: impl Into<String>,
        version: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::with_state(bridge, version, "error")
            .with_metadata(serde_json::json!({ "error": error.into() }))
    }

    fn with_state(bridge: impl Into<String>, version: impl Into<String>, state: &str) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: state.to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Publish this status to `{key_prefix}/@/status`.
    pub async fn publish(&self, publisher: &dyn Publisher, key_prefix: &str) -> Result<()> {
        let payload = serde_json::to_vec(self)?;
        publisher
            .publish(&status_key(key_prefix), payload, Qos::AtLeastOnce)
            .await
    }
}

/// Helper to publish bridge status on startup and shutdown.
pub struct StatusPublisher {
    publisher: Arc<dyn Publisher>,
    key_prefix: String,
    bridge_name: String,
    version: String,
}

impl StatusPublisher {
    /// Create a new status publisher.
    pub fn new(
        publisher: Arc<dyn Publisher>,
        key_prefix: impl Into<String>,
        bridge_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            key_prefix: key_prefix.into(),
            bridge_name: bridge_name.into(),
            version: version.into(),
        }
    }

    /// Publish "running" status with optional metadata.
    pub async fn publish_running(&self, metadata: Option<serde_json::Value>) -> Result<()> {
        let mut status = BridgeStatus::running(&self.bridge_name, &self.version);
        if let Some(meta) = metadata {
            status = status.with_metadata(meta);
        }
        status
            .publish(self.publisher.as_ref(), &self.key_prefix)
            .await
    }

    /// Publish "offline" status.
    pub async fn publish_offline(&self) -> Result<()> {
        BridgeStatus::offline(&self.bridge_name, &self.version)
            .publish(self.publisher.as_ref(), &self.key_prefix)
            .await
    }

    /// Publish "error" status.
    pub async fn publish_error(&self, error: impl Into<String>) -> Result<()> {
        BridgeStatus::error(&self.bridge_name, &self.version, error)
            .publish(self.publisher.as_ref(), &self.key_prefix)
            .await
    }
}

/// Periodically publishes a [`DevicesReport`] to `{key_prefix}/@/devices`.
pub struct StatusBroadcaster {
    manager: Arc<DeviceManager>,
    publisher: Arc<dyn Publisher>,
    bridge_name: String,
    key: String,
    interval: Duration,
}

impl StatusBroadcaster {
    pub fn new(
        manager: Arc<DeviceManager>,
        publisher: Arc<dyn Publisher>,
        bridge_name: impl Into<String>,
        key_prefix: &str,
        interval: Duration,
    ) -> Self {
        Self {
            manager,
            publisher,
            bridge_name: bridge_name.into(),
            key: devices_key(key_prefix),
            interval,
        }
    }

    /// Key the report is published to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Build the current report.
    pub fn report(&self) -> DevicesReport {
        DevicesReport::new(&self.bridge_name, self.manager.status_all())
    }

    /// Publish one report. Skipped while the publisher is disconnected.
    pub async fn publish_once(&self) -> Result<bool> {
        if !self.publisher.is_connected() {
            tracing::debug!(key = %self.key, "Publisher disconnected, skipping status report");
            return Ok(false);
        }

        let payload = serde_json::to_vec(&self.report())?;
        self.publisher
            .publish(&self.key, payload, Qos::AtMostOnce)
            .await?;
        Ok(true)
    }

    /// Publish reports every interval until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.publish_once().await {
                        tracing::warn!(
                            key = %self.key,
                            error = %e,
                            "Failed to publish status report"
                        );
                    }
                }
            }
        }

        tracing::debug!(key = %self.key, "Status broadcaster stopped");
    }
}
