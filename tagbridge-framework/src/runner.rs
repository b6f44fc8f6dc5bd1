//! Bridge runner for lifecycle management.

use std::future::Future;
use std::sync::Arc;

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tagbridge_common::{connect, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::manager::DeviceManager;
use crate::publisher::{Publisher, ZenohPublisher};
use crate::reader::TagReader;
use crate::session::SessionContext;
use crate::status::{StatusBroadcaster, StatusPublisher};
use crate::store::DeviceStore;

/// Bridge runner that manages the lifecycle of a tag bridge.
///
/// Handles:
/// - Logging initialization
/// - Zenoh connection
/// - Loading devices from the store and starting them
/// - Periodic device status reports
/// - Graceful shutdown on Ctrl+C
///
/// # Example
///
/// ```ignore
/// use tagbridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, MemoryStore};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("mybridge.json5");
///     let config = MyBridgeConfig::load(&args.config)?;
///     let store = Arc::new(MemoryStore::with_devices(config.devices().to_vec()));
///
///     let runner = BridgeRunner::new_with_args("mybridge", config, &args, reader, store).await?;
///     runner.run().await?;
///     Ok(())
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging and status.
    name: String,
    /// Bridge version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Publisher wrapping the Zenoh session.
    publisher: Arc<ZenohPublisher>,
    /// Device registry.
    manager: Arc<DeviceManager>,
    /// Bridge status announcements.
    status_publisher: StatusPublisher,
    /// Whether stored devices start automatically.
    auto_start: bool,
    /// Cancels background tasks on shutdown.
    cancel: CancellationToken,
    /// Spawned tasks.
    tasks: Vec<JoinHandle<()>>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner.
    ///
    /// This will:
    /// 1. Initialize logging based on config (with optional CLI override)
    /// 2. Connect to Zenoh
    /// 3. Create the device manager
    pub async fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: &BridgeArgs,
        reader: Arc<dyn TagReader>,
        store: Arc<dyn DeviceStore>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let log_config = config
            .logging()
            .with_level_override(args.log_level.as_deref());
        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        let session = Arc::new(
            connect(config.zenoh())
                .await
                .map_err(|e| BridgeError::ZenohConnection(e.to_string()))?,
        );

        let publisher = ZenohPublisher::new(session);
        let publisher = Arc::new(if config.zenoh().mode == "client" {
            publisher.requiring_router()
        } else {
            publisher
        });
        let options = config.session_options();
        let key_prefix = options.key_prefix.clone();
        let ctx = SessionContext::new(reader, publisher.clone(), store, options);
        let manager = Arc::new(DeviceManager::new(ctx));
        let status_publisher =
            StatusPublisher::new(publisher.clone(), key_prefix, &name, &version);

        Ok(Self {
            name,
            version,
            config,
            publisher,
            manager,
            status_publisher,
            auto_start: !args.no_auto_start,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    /// Get the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the bridge version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get the device manager.
    pub fn manager(&self) -> Arc<DeviceManager> {
        self.manager.clone()
    }

    /// Get the publisher.
    pub fn publisher(&self) -> Arc<dyn Publisher> {
        self.publisher.clone()
    }

    /// Token cancelled when the bridge shuts down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn a worker task.
    ///
    /// The task is aborted on shutdown if it has not observed the cancellation token.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(handle);
    }

    /// Run the bridge until Ctrl+C is received.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        })
        .await
    }

    /// Run the bridge until `shutdown` resolves.
    ///
    /// This will:
    /// 1. Load devices from the store and start the auto-start ones
    /// 2. Publish "running" status
    /// 3. Publish device status reports periodically
    /// 4. Wait for `shutdown`
    /// 5. Stop all devices and background tasks
    /// 6. Publish "offline" status and close the Zenoh session
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if let Err(e) = self.manager.load_from_store(self.auto_start).await {
            tracing::error!(error = %e, "Failed to load devices");
            if let Err(e) = self.status_publisher.publish_error(e.to_string()).await {
                tracing::warn!(error = %e, "Failed to publish error status");
            }
            return Err(e);
        }

        let metadata = serde_json::json!({
            "devices": self.manager.device_ids(),
            "auto_start": self.auto_start,
        });
        if let Err(e) = self.status_publisher.publish_running(Some(metadata)).await {
            tracing::warn!(error = %e, "Failed to publish running status");
        }

        let broadcaster = StatusBroadcaster::new(
            self.manager.clone(),
            self.publisher.clone(),
            &self.name,
            self.config.key_prefix(),
            self.config.status_interval(),
        );
        let cancel = self.cancel.clone();
        self.spawn(broadcaster.run(cancel));

        tracing::info!(
            bridge = %self.name,
            devices = self.manager.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        shutdown.await;

        tracing::info!(bridge = %self.name, "Received shutdown signal");

        self.cancel.cancel();
        self.manager.shutdown().await;

        for task in &self.tasks {
            task.abort();
        }

        if let Err(e) = self.status_publisher.publish_offline().await {
            tracing::warn!(error = %e, "Failed to publish offline status");
        }

        if let Err(e) = self.publisher.close().await {
            tracing::warn!(error = %e, "Error closing Zenoh session");
        }

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}
