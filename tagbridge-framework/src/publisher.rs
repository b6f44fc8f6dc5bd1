//! Payload publishing.
//!
//! Sessions publish through the [`Publisher`] trait; [`ZenohPublisher`] is the
//! production implementation backed by a Zenoh session.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use zenoh::Wait;
use zenoh::qos::CongestionControl;

use crate::error::{BridgeError, Result};

/// Delivery guarantee requested for a publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    /// Fire and forget; may be dropped under congestion.
    AtMostOnce,
    /// Retried until delivered to the transport.
    #[default]
    AtLeastOnce,
    /// Treated like `AtLeastOnce`; Zenoh transports are already reliable.
    ExactlyOnce,
}

impl Qos {
    /// Zenoh congestion control for this level.
    pub fn congestion_control(self) -> CongestionControl {
        match self {
            Qos::AtMostOnce => CongestionControl::Drop,
            Qos::AtLeastOnce | Qos::ExactlyOnce => CongestionControl::Block,
        }
    }
}

impl TryFrom<u8> for Qos {
    type Error = String;

    fn try_from(level: u8) -> std::result::Result<Self, Self::Error> {
        match level {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(format!("invalid QoS level {} (expected 0, 1 or 2)", other)),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

/// Connection state of a publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Sink for formatted payloads.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish a payload to a topic.
    ///
    /// Must fail fast with [`BridgeError::NotConnected`] rather than queue
    /// when there is no connection.
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> Result<()>;

    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }
}

/// Publisher backed by a Zenoh session.
///
/// A peer session counts as connected until closed. A client session only
/// counts as connected while it has a router to talk to; see
/// [`ZenohPublisher::requiring_router`].
#[derive(Debug)]
pub struct ZenohPublisher {
    session: Arc<zenoh::Session>,
    state: watch::Sender<ConnectionState>,
    require_router: bool,
}

impl ZenohPublisher {
    /// Wrap an open session. The publisher starts out connected.
    pub fn new(session: Arc<zenoh::Session>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connected);
        Self {
            session,
            state,
            require_router: false,
        }
    }

    /// Report disconnected while the session has no router, as in client mode.
    pub fn requiring_router(mut self) -> Self {
        self.require_router = true;
        self
    }

    fn has_router(&self) -> bool {
        self.session.info().routers_zid().wait().next().is_some()
    }

    /// Get a reference to the Zenoh session.
    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Mark the publisher disconnected and close the session.
    pub async fn close(&self) -> Result<()> {
        self.state.send_replace(ConnectionState::Disconnected);
        self.session.close().await?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for ZenohPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }

        self.session
            .put(topic, payload)
            .congestion_control(qos.congestion_control())
            .await
            .map_err(|e| BridgeError::publish(topic, e))
    }

    fn connection_state(&self) -> ConnectionState {
        let state = *self.state.borrow();
        if state == ConnectionState::Connected && self.require_router && !self.has_router() {
            return ConnectionState::Disconnected;
        }
        state
    }
}

/// Counts from a batch of lifecycle operations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleStats {
    /// Number of devices the operation succeeded for.
    pub succeeded: usize,
    /// Number of devices the operation failed for.
    pub failed: usize,
}

impl LifecycleStats {
    /// Total number of attempted operations.
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            100.0
        } else {
            (self.succeeded as f64 / self.total() as f64) * 100.0
        }
    }

    pub(crate) fn record<T>(&mut self, result: &Result<T>) {
        match result {
            Ok(_) => self.succeeded += 1,
            Err(_) => self.failed += 1,
        }
    }
}
