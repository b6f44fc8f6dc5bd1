//! Device registry and lifecycle orchestration.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use tagbridge_common::DeviceStatus;

use crate::device::DeviceConfig;
use crate::error::{BridgeError, Result};
use crate::publisher::LifecycleStats;
use crate::session::{DeviceSession, SessionContext};

/// Outcome of loading devices from the store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// Devices added to the registry.
    pub registered: usize,
    /// Devices started because they are enabled and set to auto-start.
    pub started: usize,
    /// Devices skipped because they were invalid or already registered.
    pub rejected: usize,
}

/// Registry of device sessions, keyed by device id in registration order.
///
/// The registry lock is never held across an await; lifecycle calls are
/// made on a cloned session handle.
pub struct DeviceManager {
    sessions: Mutex<IndexMap<String, Arc<DeviceSession>>>,
    ctx: SessionContext,
}

impl DeviceManager {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            sessions: Mutex::new(IndexMap::new()),
            ctx,
        }
    }

    /// Shared collaborators for new sessions.
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Register a device without starting it.
    pub fn add(&self, config: DeviceConfig) -> Result<()> {
        config.validate()?;

        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&config.id) {
            return Err(BridgeError::DuplicateDevice(config.id));
        }

        let id = config.id.clone();
        info!(device = %id, name = %config.name, host = %config.host, "Device registered");
        let session = DeviceSession::new(config, self.ctx.clone());
        sessions.insert(id, Arc::new(session));
        Ok(())
    }

    /// Stop a device if running and drop it from the registry.
    ///
    /// The evicted loop is signalled before the registry lock is released,
    /// so a device re-added under the same id never overlaps with it.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let session = {
            let mut sessions = self.sessions.lock();
            let session = sessions
                .shift_remove(id)
                .ok_or_else(|| BridgeError::NotFound(id.to_string()))?;
            session.retire();
            session
        };

        match session.stop().await {
            Ok(()) | Err(BridgeError::NotRunning(_)) => {}
            Err(e) => warn!(device = %id, error = %e, "Error stopping removed device"),
        }

        info!(device = %id, "Device removed");
        Ok(())
    }

    /// Replace a device's configuration, restarting it if it was running.
    ///
    /// Returns whether the device was restarted.
    pub async fn update(&self, config: DeviceConfig) -> Result<bool> {
        let session = self.get(&config.id)?;
        session.update(config).await
    }

    pub async fn start(&self, id: &str) -> Result<()> {
        self.get(id)?.start().await
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        self.get(id)?.stop().await
    }

    /// Start every registered device; individual failures are logged.
    pub async fn start_all(&self) -> LifecycleStats {
        let mut stats = LifecycleStats::default();

        for session in self.sessions() {
            let result = session.start().await;
            if let Err(e) = &result {
                warn!(device = %session.id(), error = %e, "Failed to start device");
            }
            stats.record(&result);
        }

        stats
    }

    /// Stop every running device; devices that are not running are skipped.
    pub async fn stop_all(&self) -> LifecycleStats {
        let mut stats = LifecycleStats::default();

        for session in self.sessions() {
            match session.stop().await {
                Err(BridgeError::NotRunning(_)) => {}
                result => {
                    if let Err(e) = &result {
                        warn!(device = %session.id(), error = %e, "Failed to stop device");
                    }
                    stats.record(&result);
                }
            }
        }

        stats
    }

    pub fn status(&self, id: &str) -> Result<DeviceStatus> {
        Ok(self.get(id)?.status())
    }

    /// Status of every device, in registration order.
    pub fn status_all(&self) -> Vec<DeviceStatus> {
        self.sessions().iter().map(|s| s.status()).collect()
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Register every persisted device and start those marked for auto-start.
    pub async fn load_from_store(&self, auto_start: bool) -> Result<LoadReport> {
        let devices = self.ctx.store.list_all().await?;
        let mut report = LoadReport::default();

        for config in devices {
            let id = config.id.clone();
            let start = auto_start && config.should_auto_start();

            if let Err(e) = self.add(config) {
                warn!(device = %id, error = %e, "Skipping stored device");
                report.rejected += 1;
                continue;
            }
            report.registered += 1;

            if start {
                match self.start(&id).await {
                    Ok(()) => report.started += 1,
                    Err(e) => warn!(device = %id, error = %e, "Failed to auto-start device"),
                }
            }
        }

        info!(
            registered = report.registered,
            started = report.started,
            rejected = report.rejected,
            "Loaded devices"
        );

        Ok(report)
    }

    /// Stop every device.
    pub async fn shutdown(&self) {
        let stats = self.stop_all().await;
        info!(stopped = stats.succeeded, failed = stats.failed, "Device manager shut down");
    }

    fn get(&self, id: &str) -> Result<Arc<DeviceSession>> {
        self.sessions
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(id.to_string()))
    }

    fn sessions(&self) -> Vec<Arc<DeviceSession>> {
        self.sessions.lock().values().cloned().collect()
    }
}
