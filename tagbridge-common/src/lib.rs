//! Tag Bridge Common Library
//!
//! Shared types and utilities for bridges that poll controller tags and publish them to Zenoh:
//!
//! - [`tag`] - Tag read model (`TagValue`, `TagReading`, `TagSnapshot`)
//! - [`payload`] - Publish formatter (JSON and delimited-string encodings)
//! - [`status`] - Device status snapshots exposed to operators
//! - [`topic`] - Topic and key expression helpers
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`session`] - Zenoh session management
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod payload;
pub mod session;
pub mod status;
pub mod tag;
pub mod topic;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, ZenohConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use payload::{PublishFormat, format_payload, format_timestamp};
pub use session::connect;
pub use status::{DeviceStatus, DevicesReport};
pub use tag::{READ_FAILED, TagReading, TagSnapshot, TagValue, normalize_tags};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };

    result.map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))
}
