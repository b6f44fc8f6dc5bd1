//! Zenoh bridge for EtherNet/IP controllers.
//!
//! This bridge polls controller tags and publishes them to Zenoh.

use std::sync::Arc;

use anyhow::{Context, Result};
use tagbridge_framework::{
    BridgeArgs, BridgeConfig, BridgeRunner, DeviceStore, MemoryStore, TagReader,
};

use zenoh_bridge_enip::config::EnipBridgeConfig;
use zenoh_bridge_enip::simulator::SimulatedReader;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = BridgeArgs::parse_with_default("enip.json5");

    // Load configuration using the framework's BridgeConfig trait
    let config = EnipBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let reader: Arc<dyn TagReader> = Arc::new(SimulatedReader::new(&config.enip.simulator));
    let store: Arc<dyn DeviceStore> =
        Arc::new(MemoryStore::with_devices(config.devices().to_vec()));

    let runner = BridgeRunner::new_with_args("enip", config, &args, reader, store)
        .await
        .context("Failed to start bridge")?;

    if runner.config().devices().is_empty() {
        tracing::warn!(config = ?args.config, "No devices configured");
    }

    tracing::info!(
        "EtherNet/IP bridge running (prefix: {}, devices: {})",
        runner.config().key_prefix(),
        runner.config().devices().len()
    );

    // Run until Ctrl+C (handles shutdown gracefully)
    runner.run().await.context("Bridge stopped with an error")
}
