//! Stub collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;

use tagbridge_framework::{
    BridgeError, ConnectionState, DeviceConfig, DeviceStore, MemoryStore, Publisher, Qos, RawRead,
    ReadTarget, Result, SessionContext, SessionOptions, TagConnection, TagReader, TagSnapshot,
    TagValue,
};

pub const KEY_PREFIX: &str = "test/enip";

/// Reader serving a fixed tag table, with switchable faults.
#[derive(Default)]
pub struct StubReader {
    values: Mutex<IndexMap<String, TagValue>>,
    fail_open: AtomicBool,
    hang: AtomicBool,
    panic_on_read: AtomicBool,
    opens: AtomicUsize,
}

impl StubReader {
    pub fn with_values<I, K, V>(values: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<TagValue>,
    {
        let reader = Self::default();
        {
            let mut table = reader.values.lock();
            for (tag, value) in values {
                table.insert(tag.into(), value.into());
            }
        }
        Arc::new(reader)
    }

    pub fn set(&self, tag: &str, value: impl Into<TagValue>) {
        self.values.lock().insert(tag.to_string(), value.into());
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.fail_open.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub fn set_panic(&self, panic: bool) {
        self.panic_on_read.store(panic, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

struct StubConnection {
    values: IndexMap<String, TagValue>,
    panic: bool,
}

#[async_trait]
impl TagConnection for StubConnection {
    async fn read_batch(&mut self, tags: &[String]) -> Result<Vec<RawRead>> {
        if self.panic {
            panic!("simulated driver fault");
        }

        Ok(tags
            .iter()
            .map(|tag| match self.values.get(tag) {
                Some(value) => RawRead::ok(tag.clone(), value.clone()),
                None => RawRead::failed(tag.clone()),
            })
            .collect())
    }

    async fn close(&mut self) {}
}

#[async_trait]
impl TagReader for StubReader {
    async fn open(
        &self,
        target: &ReadTarget,
        _timeout: Duration,
    ) -> Result<Box<dyn TagConnection>> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if self.fail_open.load(Ordering::SeqCst) {
            return Err(BridgeError::reader(format!("{} unreachable", target.host)));
        }

        Ok(Box::new(StubConnection {
            values: self.values.lock().clone(),
            panic: self.panic_on_read.load(Ordering::SeqCst),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    pub qos: Qos,
}

/// Publisher that records every payload it accepts.
pub struct RecordingPublisher {
    messages: Mutex<Vec<Message>>,
    connected: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<Message> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.messages.lock().iter().filter(|m| m.topic == topic).count()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BridgeError::NotConnected);
        }

        let payload = String::from_utf8(payload)
            .map_err(|e| BridgeError::Serialization(e.to_string()))?;
        self.messages.lock().push(Message {
            topic: topic.to_string(),
            payload,
            qos,
        });
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }
}

/// Store whose every write fails.
#[derive(Default)]
pub struct FailingStore {
    attempts: AtomicUsize,
}

impl FailingStore {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceStore for FailingStore {
    async fn list_all(&self) -> Result<Vec<DeviceConfig>> {
        Ok(Vec::new())
    }

    async fn record_readings(&self, _: &str, _: &TagSnapshot, _: DateTime<Utc>) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(BridgeError::store("disk full"))
    }
}

/// Store whose writes never complete. Tracks writes still pending.
#[derive(Default)]
pub struct HangingStore {
    calls: AtomicUsize,
    pending: Arc<AtomicUsize>,
}

impl HangingStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceStore for HangingStore {
    async fn list_all(&self) -> Result<Vec<DeviceConfig>> {
        Ok(Vec::new())
    }

    async fn record_readings(&self, _: &str, _: &TagSnapshot, _: DateTime<Utc>) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pending.fetch_add(1, Ordering::SeqCst);
        let _guard = PendingGuard(self.pending.clone());
        std::future::pending::<()>().await;
        Ok(())
    }
}

pub fn context(
    reader: Arc<StubReader>,
    publisher: Arc<RecordingPublisher>,
    store: Arc<MemoryStore>,
) -> SessionContext {
    context_with_store(reader, publisher, store)
}

pub fn context_with_store(
    reader: Arc<StubReader>,
    publisher: Arc<RecordingPublisher>,
    store: Arc<dyn DeviceStore>,
) -> SessionContext {
    SessionContext::new(
        reader,
        publisher,
        store,
        SessionOptions::default()
            .with_key_prefix(KEY_PREFIX)
            .with_connect_timeout(Duration::from_millis(500))
            .with_read_timeout(Duration::from_millis(500)),
    )
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
