//! Tag Bridge Framework
//!
//! Orchestration core for bridges that poll tags from industrial controllers
//! and publish them to Zenoh.
//!
//! # Overview
//!
//! This framework provides:
//! - [`DeviceSession`] running the read loop of one controller
//! - [`DeviceManager`] owning the device registry and lifecycle operations
//! - [`TagReader`], [`Publisher`] and [`DeviceStore`] traits for the outside world
//! - [`ZenohPublisher`] and [`MemoryStore`] implementations
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, shutdown, signal handling)
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BridgeStatus`] and [`StatusBroadcaster`] for status reporting
//!
//! # Example
//!
//! ```ignore
//! use tagbridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let reader: Arc<dyn TagReader> = Arc::new(MyReader::new());
//!     let store: Arc<dyn DeviceStore> =
//!         Arc::new(MemoryStore::with_devices(config.devices().to_vec()));
//!
//!     let runner = BridgeRunner::new_with_args("mybridge", config, &args, reader, store).await?;
//!     runner.run().await?;
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod device;
mod error;
mod manager;
mod publisher;
mod reader;
mod runner;
mod session;
mod status;
mod store;

pub use args::BridgeArgs;
pub use config::{BridgeConfig, DEFAULT_STATUS_INTERVAL, validate_devices};
pub use device::{DEFAULT_POLL_INTERVAL_SECS, DeviceConfig, MIN_POLL_INTERVAL};
pub use error::{BridgeError, Result};
pub use manager::{DeviceManager, LoadReport};
pub use publisher::{ConnectionState, LifecycleStats, Publisher, Qos, ZenohPublisher};
pub use reader::{RawRead, ReadTarget, TagConnection, TagReader, read_tags};
pub use runner::BridgeRunner;
pub use session::{
    DeviceSession, MAX_CONNECT_TIMEOUT, MIN_JOIN_TIMEOUT, RuntimeState, STORE_QUEUE_DEPTH,
    SessionContext, SessionOptions, SessionState,
};
pub use status::{BridgeStatus, StatusBroadcaster, StatusPublisher};
pub use store::{DeviceStore, MemoryStore, TagStats};

// Re-export commonly used types from tagbridge-common
pub use tagbridge_common::{
    DeviceStatus, DevicesReport, LoggingConfig, PublishFormat, TagReading, TagSnapshot, TagValue,
    ZenohConfig,
};
