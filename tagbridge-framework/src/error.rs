//! Error types for the bridge framework.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur in a bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// A device with this identifier is already registered.
    #[error("Device already registered: {0}")]
    DuplicateDevice(String),

    /// No device with this identifier is registered.
    #[error("Device not found: {0}")]
    NotFound(String),

    /// The device's read loop is already active.
    #[error("Device already running: {0}")]
    AlreadyRunning(String),

    /// The device's read loop is not active.
    #[error("Device not running: {0}")]
    NotRunning(String),

    /// An update tried to change a device's identifier.
    #[error("Device identifier mismatch: expected {expected}, got {found}")]
    IdMismatch { expected: String, found: String },

    /// The device has no usable tag names.
    #[error("No tags configured")]
    NoTagsConfigured,

    /// The tag reader could not reach or read the controller.
    #[error("Read error: {0}")]
    Reader(String),

    /// Publishing error.
    #[error("Failed to publish to {key}: {message}")]
    Publish { key: String, message: String },

    /// The publisher has no live connection.
    #[error("Publisher not connected")]
    NotConnected,

    /// Device-state store error.
    #[error("Store error: {0}")]
    Store(String),

    /// Zenoh connection error.
    #[error("Zenoh connection error: {0}")]
    ZenohConnection(String),

    /// Zenoh session error.
    #[error("Zenoh session error: {0}")]
    ZenohSession(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Create a reader error.
    pub fn reader(msg: impl Into<String>) -> Self {
        Self::Reader(msg.into())
    }

    /// Create a publish error for a key.
    pub fn publish(key: impl Into<String>, msg: impl ToString) -> Self {
        Self::Publish {
            key: key.into(),
            message: msg.to_string(),
        }
    }

    /// Create a store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Lifecycle errors returned synchronously to the caller of a registry operation.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::DuplicateDevice(_)
                | Self::NotFound(_)
                | Self::AlreadyRunning(_)
                | Self::NotRunning(_)
                | Self::IdMismatch { .. }
        )
    }

    /// Device-level errors that are recorded and retried on the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoTagsConfigured | Self::Reader(_) | Self::Publish { .. } | Self::NotConnected
        )
    }
}

impl From<zenoh::Error> for BridgeError {
    fn from(err: zenoh::Error) -> Self {
        Self::ZenohSession(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<json5::Error> for BridgeError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

impl From<tagbridge_common::Error> for BridgeError {
    fn from(err: tagbridge_common::Error) -> Self {
        match err {
            tagbridge_common::Error::Config(msg) => Self::Config(msg),
            tagbridge_common::Error::Zenoh(e) => Self::ZenohSession(e.to_string()),
            tagbridge_common::Error::Json(e) => Self::Serialization(e.to_string()),
            tagbridge_common::Error::Io(e) => Self::Io(e),
        }
    }
}
