//! Per-device polling session.
//!
//! A [`DeviceSession`] owns the read loop of one controller. Each cycle opens a
//! reader connection, reads the configured tags as a batch, stores the batch
//! as the latest data, formats it and publishes it to the device's data topic.
//!
//! Runtime state lives in a `watch` channel so status readers always see a
//! consistent snapshot without waiting on the loop. Lifecycle operations
//! (start, stop, update) are serialized by an async mutex.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tagbridge_common::topic::KEY_PREFIX;
use tagbridge_common::{DeviceStatus, TagSnapshot, format_payload};

use crate::device::DeviceConfig;
use crate::error::{BridgeError, Result};
use crate::publisher::{Publisher, Qos};
use crate::reader::{ReadTarget, TagReader, read_tags};
use crate::store::DeviceStore;

/// Upper bound on how long opening a reader connection may take.
pub const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Lower bound on how long `stop` waits for the loop to finish.
pub const MIN_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Read batches queued for the store before new ones are dropped.
pub const STORE_QUEUE_DEPTH: usize = 16;

type StoreRecord = (TagSnapshot, DateTime<Utc>);

/// Tunables shared by every session of a manager.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Prefix for devices without an explicit topic prefix.
    pub key_prefix: String,
    /// Reader connection timeout, capped at [`MAX_CONNECT_TIMEOUT`].
    pub connect_timeout: Duration,
    /// Timeout for one batch read.
    pub read_timeout: Duration,
    /// Timeout for one publish.
    pub publish_timeout: Duration,
    /// Delivery guarantee for data payloads.
    pub qos: Qos,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            key_prefix: KEY_PREFIX.to_string(),
            connect_timeout: MAX_CONNECT_TIMEOUT,
            read_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(5),
            qos: Qos::AtLeastOnce,
        }
    }
}

impl SessionOptions {
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    /// Connection timeout actually used.
    pub fn effective_connect_timeout(&self) -> Duration {
        self.connect_timeout.min(MAX_CONNECT_TIMEOUT)
    }

    /// How long `stop` waits for a loop polling at `poll_interval`.
    pub fn join_timeout(&self, poll_interval: Duration) -> Duration {
        poll_interval.saturating_mul(2).max(MIN_JOIN_TIMEOUT)
    }
}

/// Collaborators a session talks to.
#[derive(Clone)]
pub struct SessionContext {
    pub reader: Arc<dyn TagReader>,
    pub publisher: Arc<dyn Publisher>,
    pub store: Arc<dyn DeviceStore>,
    pub options: SessionOptions,
}

impl SessionContext {
    pub fn new(
        reader: Arc<dyn TagReader>,
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn DeviceStore>,
        options: SessionOptions,
    ) -> Self {
        Self {
            reader,
            publisher,
            store,
            options,
        }
    }
}

/// Mutable runtime state of a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeState {
    pub running: bool,
    pub connected: bool,
    pub last_data: TagSnapshot,
    pub last_error: Option<String>,
    pub message_count: u64,
    pub last_update: Option<DateTime<Utc>>,
}

/// Configuration and runtime state, published together so they never tear.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub config: Arc<DeviceConfig>,
    pub runtime: RuntimeState,
}

impl SessionState {
    /// Operator-facing view of this state.
    pub fn to_status(&self) -> DeviceStatus {
        let config = &self.config;
        let runtime = &self.runtime;
        DeviceStatus {
            device_id: config.id.clone(),
            name: config.name.clone(),
            host: config.host.clone(),
            slot: config.slot,
            tags: config.tags.clone(),
            poll_interval_secs: config.poll_interval_secs,
            running: runtime.running,
            connected: runtime.connected,
            last_data: runtime.last_data.clone(),
            last_error: runtime.last_error.clone(),
            message_count: runtime.message_count,
            last_update: runtime.last_update,
        }
    }
}

#[derive(Debug, Default)]
struct Lifecycle {
    retired: bool,
    token: Option<CancellationToken>,
}

struct Shared {
    id: String,
    state: watch::Sender<SessionState>,
    lifecycle: parking_lot::Mutex<Lifecycle>,
    ctx: SessionContext,
}

impl Shared {
    fn update(&self, f: impl FnOnce(&mut RuntimeState)) {
        self.state.send_modify(|state| f(&mut state.runtime));
    }

    fn record_failure(&self, error: &BridgeError) {
        let message = error.to_string();
        self.update(|state| {
            state.connected = false;
            state.last_error = Some(message);
        });
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    recorder: JoinHandle<()>,
}

/// One controller's polling session.
pub struct DeviceSession {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.shared.id)
            .field("running", &self.is_running())
            .finish()
    }
}

impl DeviceSession {
    /// Create a stopped session.
    pub fn new(config: DeviceConfig, ctx: SessionContext) -> Self {
        let (state, _) = watch::channel(SessionState {
            config: Arc::new(config),
            runtime: RuntimeState::default(),
        });
        let id = state.borrow().config.id.clone();

        Self {
            shared: Arc::new(Shared {
                id,
                state,
                lifecycle: parking_lot::Mutex::new(Lifecycle::default()),
                ctx,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Current configuration.
    pub fn config(&self) -> Arc<DeviceConfig> {
        self.shared.state.borrow().config.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.borrow().runtime.running
    }

    /// Consistent snapshot of configuration and runtime state.
    pub fn snapshot(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    /// Operator-facing status. Never waits on the read loop.
    pub fn status(&self) -> DeviceStatus {
        self.shared.state.borrow().to_status()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Start the read loop.
    pub async fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        self.start_locked(&mut worker)
    }

    /// Stop the read loop and wait for it to finish.
    ///
    /// The loop is abandoned after the join timeout; the session is then
    /// reported stopped regardless.
    pub async fn stop(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        self.stop_locked(&mut worker).await
    }

    /// Replace the configuration, restarting the loop if it was running.
    ///
    /// Returns whether the loop was restarted.
    pub async fn update(&self, config: DeviceConfig) -> Result<bool> {
        if config.id != self.shared.id {
            return Err(BridgeError::IdMismatch {
                expected: self.shared.id.clone(),
                found: config.id,
            });
        }
        config.validate()?;

        let mut worker = self.worker.lock().await;
        let was_running = worker.is_some();

        if was_running {
            self.stop_locked(&mut worker).await?;
        }

        let config = Arc::new(config);
        self.shared.state.send_modify(|state| state.config = config);
        info!(device = %self.shared.id, restart = was_running, "Device configuration updated");

        if was_running {
            self.start_locked(&mut worker)?;
        }

        Ok(was_running)
    }

    /// Permanently disable the session and signal its loop to stop.
    ///
    /// Does not wait. Once retired the session can no longer be started and
    /// its loop publishes nothing further.
    pub fn retire(&self) {
        let mut lifecycle = self.shared.lifecycle.lock();
        lifecycle.retired = true;
        if let Some(token) = lifecycle.token.take() {
            token.cancel();
        }
    }

    fn start_locked(&self, slot: &mut Option<Worker>) -> Result<()> {
        if let Some(worker) = slot.as_ref() {
            if !worker.handle.is_finished() {
                return Err(BridgeError::AlreadyRunning(self.shared.id.clone()));
            }
        }

        let cancel = CancellationToken::new();
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.retired {
                return Err(BridgeError::NotFound(self.shared.id.clone()));
            }
            lifecycle.token = Some(cancel.clone());
        }

        let config = self.config();
        self.shared.update(|state| state.running = true);

        if let Some(stale) = slot.take() {
            stale.recorder.abort();
        }

        let (records, queue) = mpsc::channel(STORE_QUEUE_DEPTH);
        let recorder = tokio::spawn(record_loop(
            self.shared.ctx.store.clone(),
            self.shared.id.clone(),
            queue,
        ));
        let handle = tokio::spawn(run_loop(
            self.shared.clone(),
            config,
            cancel.clone(),
            records,
        ));
        *slot = Some(Worker {
            cancel,
            handle,
            recorder,
        });

        info!(device = %self.shared.id, "Device started");
        Ok(())
    }

    async fn stop_locked(&self, slot: &mut Option<Worker>) -> Result<()> {
        let Some(mut worker) = slot.take() else {
            return Err(BridgeError::NotRunning(self.shared.id.clone()));
        };

        worker.cancel.cancel();
        self.shared.lifecycle.lock().token = None;

        let poll_interval = self.config().poll_interval();
        let join_timeout = self.shared.ctx.options.join_timeout(poll_interval);

        match tokio::time::timeout(join_timeout, &mut worker.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_panic() => {
                warn!(device = %self.shared.id, "Read loop panicked");
            }
            Ok(Err(_)) => {}
            Err(_) => {
                warn!(
                    device = %self.shared.id,
                    timeout_ms = join_timeout.as_millis() as u64,
                    "Read loop did not stop in time, abandoning it"
                );
                worker.handle.abort();
            }
        }

        // Batches still queued for the store are dropped with the session.
        worker.recorder.abort();

        self.shared.update(|state| {
            state.running = false;
            state.connected = false;
        });

        info!(device = %self.shared.id, "Device stopped");
        Ok(())
    }
}

async fn run_loop(
    shared: Arc<Shared>,
    config: Arc<DeviceConfig>,
    cancel: CancellationToken,
    records: mpsc::Sender<StoreRecord>,
) {
    let interval = config.poll_interval();
    let topic = config.data_topic(&shared.ctx.options.key_prefix);

    info!(
        device = %config.id,
        name = %config.name,
        host = %config.host,
        topic = %topic,
        interval_secs = config.poll_interval_secs,
        tags = config.tags.len(),
        "Starting read loop"
    );

    while !cancel.is_cancelled() {
        let cycle =
            AssertUnwindSafe(poll_once(&shared, &config, &topic, &cancel, &records)).catch_unwind();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = cycle => {
                if let Err(panic) = result {
                    let message = panic_message(panic.as_ref());
                    warn!(device = %config.id, error = %message, "Read cycle panicked");
                    shared.update(|state| {
                        state.connected = false;
                        state.last_error = Some(format!("Internal error: {}", message));
                    });
                }
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!(device = %config.id, "Read loop finished");
}

/// One read cycle: read, record, format, publish.
async fn poll_once(
    shared: &Shared,
    config: &DeviceConfig,
    topic: &str,
    cancel: &CancellationToken,
    records: &mpsc::Sender<StoreRecord>,
) {
    let ctx = &shared.ctx;
    let tags = config.normalized_tags();

    if tags.is_empty() {
        shared.record_failure(&BridgeError::NoTagsConfigured);
        return;
    }

    let target = ReadTarget {
        host: config.host.clone(),
        slot: config.slot,
    };

    let snapshot = match read_tags(
        ctx.reader.as_ref(),
        &target,
        &tags,
        ctx.options.effective_connect_timeout(),
        ctx.options.read_timeout,
    )
    .await
    {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(device = %config.id, host = %config.host, error = %e, "Read cycle failed");
            shared.record_failure(&e);
            return;
        }
    };

    // A removed or stopped session must not publish.
    if snapshot.is_empty() || cancel.is_cancelled() {
        return;
    }

    let now = Utc::now();
    shared.update(|state| {
        state.connected = true;
        state.last_error = None;
        state.last_data = snapshot.clone();
        state.last_update = Some(now);
    });

    let failed = snapshot.failed_tags().len();
    if failed > 0 {
        debug!(device = %config.id, failed, total = snapshot.len(), "Some tags failed to read");
    }

    let payload = format_payload(config.format, config.hwid(), &snapshot, now);
    let published = tokio::time::timeout(
        ctx.options.publish_timeout,
        ctx.publisher.publish(topic, payload.into_bytes(), ctx.options.qos),
    )
    .await
    .unwrap_or_else(|_| Err(BridgeError::publish(topic, "publish timed out")));

    match published {
        Ok(()) => {
            shared.update(|state| state.message_count += 1);
            debug!(
                device = %config.id,
                topic = %topic,
                tags = snapshot.len(),
                "Published readings"
            );
        }
        Err(e) => {
            warn!(device = %config.id, topic = %topic, error = %e, "Failed to publish readings");
            let message = e.to_string();
            shared.update(|state| state.last_error = Some(message));
        }
    }

    match records.try_send((snapshot, now)) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(device = %config.id, "Store is falling behind, dropping read batch");
        }
        Err(TrySendError::Closed(_)) => {
            debug!(device = %config.id, "Store recorder gone, dropping read batch");
        }
    }
}

/// Feed queued read batches to the store one at a time.
async fn record_loop(
    store: Arc<dyn DeviceStore>,
    device_id: String,
    mut queue: mpsc::Receiver<StoreRecord>,
) {
    while let Some((snapshot, at)) = queue.recv().await {
        if let Err(e) = store.record_readings(&device_id, &snapshot, at).await {
            warn!(device = %device_id, error = %e, "Failed to record readings");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
