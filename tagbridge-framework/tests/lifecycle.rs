//! Device session and manager lifecycle tests.
//!
//! Devices poll every 50ms against stub collaborators, so these tests run on
//! real time with generous deadlines.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_test::{assert_err, assert_ok};

use common::{
    FailingStore, HangingStore, KEY_PREFIX, RecordingPublisher, StubReader, context,
    context_with_store, wait_for,
};
use tagbridge_framework::{
    BridgeError, DeviceConfig, DeviceManager, DeviceSession, MemoryStore, PublishFormat,
    STORE_QUEUE_DEPTH, StatusBroadcaster, TagReading,
};

const DEADLINE: Duration = Duration::from_secs(3);

fn press(id: &str) -> DeviceConfig {
    DeviceConfig::new(id, format!("press-{}", id), "10.0.0.1")
        .with_tags(["Speed", "Temperature"])
        .with_poll_interval(0.05)
        .with_hardware_id("HW-1")
}

fn data_topic(id: &str) -> String {
    format!("{}/press-{}/data", KEY_PREFIX, id)
}

struct Harness {
    reader: Arc<StubReader>,
    publisher: Arc<RecordingPublisher>,
    store: Arc<MemoryStore>,
    manager: DeviceManager,
}

fn harness() -> Harness {
    let reader = StubReader::with_values([
        ("Speed", tagbridge_framework::TagValue::Int(1500)),
        ("Temperature", tagbridge_framework::TagValue::Real(72.5)),
    ]);
    let publisher = RecordingPublisher::new();
    let store = Arc::new(MemoryStore::new());
    let manager = DeviceManager::new(context(reader.clone(), publisher.clone(), store.clone()));

    Harness {
        reader,
        publisher,
        store,
        manager,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_running_device_publishes_json() {
    let h = harness();
    h.manager.add(press("a")).unwrap();
    h.manager.start("a").await.unwrap();

    let topic = data_topic("a");
    assert!(wait_for(DEADLINE, || h.publisher.count(&topic) >= 2).await);

    let message = &h.publisher.on_topic(&topic)[0];
    let payload: serde_json::Value = serde_json::from_str(&message.payload).unwrap();
    let keys: Vec<&String> = payload.as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["HWID", "Speed", "Temperature", "Timestamp"]);
    assert_eq!(payload["HWID"], "HW-1");
    assert_eq!(payload["Speed"], 1500);
    assert_eq!(payload["Temperature"], 72.5);

    let status = h.manager.status("a").unwrap();
    assert!(status.running);
    assert!(status.connected);
    assert!(status.message_count >= 2);
    assert!(status.last_update.is_some());
    assert!(status.last_error.is_none());
    assert_eq!(status.last_data.get("Speed"), Some(&TagReading::value(1500)));

    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delimited_format() {
    let h = harness();
    h.manager
        .add(press("a").with_format(PublishFormat::Delimited))
        .unwrap();
    h.manager.start("a").await.unwrap();

    let topic = data_topic("a");
    assert!(wait_for(DEADLINE, || h.publisher.count(&topic) >= 1).await);

    let payload = h.publisher.on_topic(&topic)[0].payload.clone();
    let fields: Vec<&str> = payload.split(',').collect();
    assert_eq!(fields.len(), 4);
    assert_eq!(&fields[..3], &["HW-1", "1500", "72.5"]);
    assert!(fields[3].ends_with('Z'));

    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_tags_are_omitted_from_payload() {
    let h = harness();
    h.manager
        .add(press("a").with_tags(["Speed", "Missing", "Temperature"]))
        .unwrap();
    h.manager.start("a").await.unwrap();

    let topic = data_topic("a");
    assert!(wait_for(DEADLINE, || h.publisher.count(&topic) >= 1).await);

    let payload: serde_json::Value =
        serde_json::from_str(&h.publisher.on_topic(&topic)[0].payload).unwrap();
    assert!(payload.get("Missing").is_none());
    assert_eq!(payload["Speed"], 1500);

    let status = h.manager.status("a").unwrap();
    assert_eq!(status.last_data.len(), 3);
    assert_eq!(
        status.last_data.get("Missing").and_then(|r| r.error()),
        Some("Read failed")
    );
    assert!(status.connected);

    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_all_tags_failed_still_publishes() {
    let h = harness();
    h.manager
        .add(
            press("a")
                .with_tags(["Nope1", "Nope2"])
                .with_format(PublishFormat::Delimited),
        )
        .unwrap();
    h.manager.start("a").await.unwrap();

    let topic = data_topic("a");
    assert!(wait_for(DEADLINE, || h.publisher.count(&topic) >= 1).await);

    let payload = h.publisher.on_topic(&topic)[0].payload.clone();
    let fields: Vec<&str> = payload.split(',').collect();
    assert_eq!(fields.len(), 2);
    assert_eq!(fields[0], "HW-1");

    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_tags_configured() {
    let h = harness();
    h.manager.add(press("a").with_tags([" ", ""])).unwrap();
    h.manager.start("a").await.unwrap();

    assert!(
        wait_for(DEADLINE, || {
            h.manager.status("a").unwrap().last_error.as_deref() == Some("No tags configured")
        })
        .await
    );

    let status = h.manager.status("a").unwrap();
    assert!(status.running);
    assert!(!status.connected);
    assert_eq!(status.message_count, 0);
    assert!(h.publisher.messages().is_empty());
    assert_eq!(h.reader.opens(), 0);

    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_controller_recovers() {
    let h = harness();
    h.reader.set_unreachable(true);
    h.manager.add(press("a")).unwrap();
    h.manager.start("a").await.unwrap();

    assert!(
        wait_for(DEADLINE, || {
            h.manager
                .status("a")
                .unwrap()
                .last_error
                .is_some_and(|e| e.starts_with("Read error:"))
        })
        .await
    );

    let status = h.manager.status("a").unwrap();
    assert!(status.running);
    assert!(!status.connected);
    assert_eq!(status.message_count, 0);

    h.reader.set_unreachable(false);
    assert!(wait_for(DEADLINE, || h.manager.status("a").unwrap().connected).await);
    assert!(h.manager.status("a").unwrap().last_error.is_none());
    assert!(wait_for(DEADLINE, || h.publisher.count(&data_topic("a")) >= 1).await);

    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_publish_failure_is_recorded() {
    let h = harness();
    h.publisher.set_connected(false);
    h.manager.add(press("a")).unwrap();
    h.manager.start("a").await.unwrap();

    assert!(
        wait_for(DEADLINE, || {
            h.manager.status("a").unwrap().last_error.as_deref() == Some("Publisher not connected")
        })
        .await
    );

    let status = h.manager.status("a").unwrap();
    assert_eq!(status.message_count, 0);
    assert!(status.last_update.is_some());
    assert_eq!(status.last_data.len(), 2);

    h.publisher.set_connected(true);
    assert!(wait_for(DEADLINE, || h.manager.status("a").unwrap().message_count >= 1).await);

    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lifecycle_errors() {
    let h = harness();
    h.manager.add(press("a")).unwrap();

    assert!(matches!(
        h.manager.add(press("a")),
        Err(BridgeError::DuplicateDevice(id)) if id == "a"
    ));
    assert_err!(h.manager.stop("a").await);
    assert!(matches!(
        h.manager.status("zzz"),
        Err(BridgeError::NotFound(_))
    ));
    assert!(matches!(
        h.manager.start("zzz").await,
        Err(BridgeError::NotFound(_))
    ));
    assert!(matches!(
        h.manager.remove("zzz").await,
        Err(BridgeError::NotFound(_))
    ));

    assert_ok!(h.manager.start("a").await);
    assert!(matches!(
        h.manager.start("a").await,
        Err(BridgeError::AlreadyRunning(_))
    ));

    assert_ok!(h.manager.stop("a").await);
    let status = h.manager.status("a").unwrap();
    assert!(!status.running);
    assert!(!status.connected);

    // A stopped device can be started again.
    h.manager.start("a").await.unwrap();
    assert!(h.manager.status("a").unwrap().running);
    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_device_rejected() {
    let h = harness();
    let result = h.manager.add(press("a").with_poll_interval(0.0));
    assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    assert!(h.manager.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_does_not_wait_for_hung_reader() {
    let h = harness();
    h.reader.set_hang(true);
    h.manager.add(press("a")).unwrap();
    h.manager.start("a").await.unwrap();

    assert!(wait_for(DEADLINE, || h.reader.opens() >= 1).await);

    let started = Instant::now();
    h.manager.stop("a").await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!h.manager.status("a").unwrap().running);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_reader_keeps_loop_alive() {
    let h = harness();
    h.reader.set_panic(true);
    h.manager.add(press("a")).unwrap();
    h.manager.start("a").await.unwrap();

    assert!(
        wait_for(DEADLINE, || {
            h.manager
                .status("a")
                .unwrap()
                .last_error
                .is_some_and(|e| e.starts_with("Internal error:"))
        })
        .await
    );
    assert!(h.manager.status("a").unwrap().running);

    h.reader.set_panic(false);
    assert!(wait_for(DEADLINE, || h.publisher.count(&data_topic("a")) >= 1).await);

    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remove_stops_publishing() {
    let h = harness();
    h.manager.add(press("a")).unwrap();
    h.manager.start("a").await.unwrap();

    let topic = data_topic("a");
    assert!(wait_for(DEADLINE, || h.publisher.count(&topic) >= 1).await);

    h.manager.remove("a").await.unwrap();
    let after_remove = h.publisher.count(&topic);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(h.publisher.count(&topic), after_remove);
    assert!(matches!(
        h.manager.status("a"),
        Err(BridgeError::NotFound(_))
    ));
    assert!(!h.manager.contains("a"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readd_after_remove_uses_new_config() {
    let h = harness();
    h.manager.add(press("a")).unwrap();
    h.manager.start("a").await.unwrap();
    assert!(wait_for(DEADLINE, || h.publisher.count(&data_topic("a")) >= 1).await);

    h.manager.remove("a").await.unwrap();
    let old_count = h.publisher.count(&data_topic("a"));

    let replacement = press("a").with_topic_prefix("plant/line2");
    h.manager.add(replacement).unwrap();
    h.manager.start("a").await.unwrap();

    assert!(wait_for(DEADLINE, || h.publisher.count("plant/line2/data") >= 2).await);
    assert_eq!(h.publisher.count(&data_topic("a")), old_count);

    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_update_running_device() {
    let h = harness();
    h.manager.add(press("a")).unwrap();
    h.manager.start("a").await.unwrap();
    assert!(wait_for(DEADLINE, || h.publisher.count(&data_topic("a")) >= 1).await);

    let restarted = h
        .manager
        .update(press("a").with_tags(["Speed"]).with_topic_prefix("plant/a"))
        .await
        .unwrap();
    assert!(restarted);

    assert!(wait_for(DEADLINE, || h.publisher.count("plant/a/data") >= 1).await);
    let payload: serde_json::Value =
        serde_json::from_str(&h.publisher.on_topic("plant/a/data")[0].payload).unwrap();
    assert!(payload.get("Temperature").is_none());

    let status = h.manager.status("a").unwrap();
    assert!(status.running);
    assert_eq!(status.tags, vec!["Speed"]);

    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_update_stopped_device_stays_stopped() {
    let h = harness();
    h.manager.add(press("a")).unwrap();

    let restarted = h
        .manager
        .update(press("a").with_poll_interval(1.0))
        .await
        .unwrap();
    assert!(!restarted);

    let status = h.manager.status("a").unwrap();
    assert!(!status.running);
    assert_eq!(status.poll_interval_secs, 1.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_update_rejects_id_change() {
    let h = harness();
    let session = DeviceSession::new(
        press("a"),
        context(h.reader.clone(), h.publisher.clone(), h.store.clone()),
    );

    let result = session.update(press("b")).await;
    assert!(matches!(
        result,
        Err(BridgeError::IdMismatch { expected, found }) if expected == "a" && found == "b"
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_all_and_stop_all() {
    let h = harness();
    h.manager.add(press("a")).unwrap();
    h.manager.add(press("b")).unwrap();
    h.manager.add(press("c")).unwrap();
    h.manager.start("b").await.unwrap();

    let stats = h.manager.start_all().await;
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.failed, 1);

    let ids: Vec<String> = h
        .manager
        .status_all()
        .into_iter()
        .map(|s| s.device_id)
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(h.manager.status_all().iter().all(|s| s.running));

    let stats = h.manager.stop_all().await;
    assert_eq!(stats.succeeded, 3);
    assert_eq!(stats.failed, 0);
    assert!(h.manager.status_all().iter().all(|s| !s.running));

    let stats = h.manager.stop_all().await;
    assert_eq!(stats.total(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_load_from_store() {
    let reader = StubReader::with_values([("Speed", 1500)]);
    let publisher = RecordingPublisher::new();

    let mut disabled = press("b");
    disabled.enabled = false;
    let mut manual = press("c");
    manual.auto_start = false;
    let invalid = press("d").with_poll_interval(-1.0);

    let store = Arc::new(MemoryStore::with_devices([
        press("a"),
        disabled,
        manual,
        invalid,
    ]));
    let manager = DeviceManager::new(context(reader, publisher, store));

    let report = manager.load_from_store(true).await.unwrap();
    assert_eq!(report.registered, 3);
    assert_eq!(report.started, 1);
    assert_eq!(report.rejected, 1);

    assert!(manager.status("a").unwrap().running);
    assert!(!manager.status("b").unwrap().running);
    assert!(!manager.status("c").unwrap().running);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readings_reach_store() {
    let h = harness();
    h.manager.add(press("a").with_tags(["Speed", "Missing"])).unwrap();
    h.manager.start("a").await.unwrap();

    assert!(
        wait_for(DEADLINE, || {
            h.store
                .tag_stats("a")
                .get("Speed")
                .is_some_and(|s| s.read_count >= 2)
        })
        .await
    );

    let stats = h.store.tag_stats("a");
    assert!(stats["Missing"].error_count >= 1);
    assert_eq!(stats["Speed"].data_type.as_deref(), Some("int"));

    h.manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_store_errors_do_not_affect_device() {
    let h = harness();
    let store = Arc::new(FailingStore::default());
    let manager = DeviceManager::new(context_with_store(
        h.reader.clone(),
        h.publisher.clone(),
        store.clone(),
    ));
    manager.add(press("a")).unwrap();
    manager.start("a").await.unwrap();

    assert!(wait_for(DEADLINE, || store.attempts() >= 3).await);
    let first = manager.status("a").unwrap().message_count;
    assert!(wait_for(DEADLINE, || manager.status("a").unwrap().message_count > first + 2).await);

    let status = manager.status("a").unwrap();
    assert!(status.running);
    assert!(status.connected);
    assert_eq!(status.last_error, None);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hung_store_is_bounded_and_released_on_remove() {
    let h = harness();
    let store = Arc::new(HangingStore::default());
    let manager = DeviceManager::new(context_with_store(
        h.reader.clone(),
        h.publisher.clone(),
        store.clone(),
    ));
    manager.add(press("a").with_poll_interval(0.01)).unwrap();
    manager.start("a").await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    // One write in flight at a time, and polling carries on regardless.
    assert_eq!(store.calls(), 1);
    assert_eq!(store.pending(), 1);
    assert!(manager.status("a").unwrap().message_count > STORE_QUEUE_DEPTH as u64);
    assert_eq!(manager.status("a").unwrap().last_error, None);

    manager.remove("a").await.unwrap();
    assert!(wait_for(DEADLINE, || store.pending() == 0).await);
    assert_eq!(store.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_observers_see_consistent_snapshots() {
    let h = harness();
    let session = Arc::new(DeviceSession::new(
        press("a"),
        context(h.reader.clone(), h.publisher.clone(), h.store.clone()),
    ));
    let mut updates = session.subscribe();
    session.start().await.unwrap();

    // A connected state always carries the batch it was read with.
    let deadline = tokio::time::Instant::now() + DEADLINE;
    let mut seen_connected = false;
    while !seen_connected && tokio::time::Instant::now() < deadline {
        if tokio::time::timeout(Duration::from_millis(200), updates.changed())
            .await
            .is_err()
        {
            continue;
        }
        let state = updates.borrow_and_update().clone();
        if state.runtime.connected {
            assert_eq!(state.runtime.last_data.len(), 2);
            assert!(state.runtime.last_update.is_some());
            seen_connected = true;
        }
    }
    assert!(seen_connected);

    session.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_broadcaster() {
    let h = harness();
    h.manager.add(press("a")).unwrap();
    let manager = Arc::new(h.manager);

    let broadcaster = StatusBroadcaster::new(
        manager.clone(),
        h.publisher.clone(),
        "enip",
        KEY_PREFIX,
        Duration::from_millis(50),
    );
    assert_eq!(broadcaster.key(), "test/enip/@/devices");

    assert!(broadcaster.publish_once().await.unwrap());
    let report: serde_json::Value =
        serde_json::from_str(&h.publisher.on_topic("test/enip/@/devices")[0].payload).unwrap();
    assert_eq!(report["bridge"], "enip");
    assert_eq!(report["devices"][0]["device_id"], "a");
    assert_eq!(report["devices"][0]["running"], false);

    h.publisher.set_connected(false);
    assert!(!broadcaster.publish_once().await.unwrap());
    assert_eq!(h.publisher.count("test/enip/@/devices"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_are_all_registered() {
    let h = harness();
    assert!(h.manager.status_all().is_empty());

    let manager = Arc::new(h.manager);
    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.add(press(&format!("d{}", i))) })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(manager.len(), 16);
    for i in 0..16 {
        let status = manager.status(&format!("d{}", i)).unwrap();
        assert!(!status.running);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_add_remove_race_never_half_registers() {
    let h = harness();
    let manager = Arc::new(h.manager);

    for _ in 0..20 {
        manager.add(press("r")).unwrap();
        manager.start("r").await.unwrap();

        let remover = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.remove("r").await })
        };
        let adder = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.add(press("r")) })
        };

        let removed = remover.await.unwrap();
        let added = adder.await.unwrap();
        assert!(removed.is_ok());

        match added {
            Ok(()) => {
                let status = manager.status("r").unwrap();
                assert!(!status.running);
                manager.remove("r").await.unwrap();
            }
            Err(BridgeError::DuplicateDevice(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }

        assert!(!manager.contains("r"));
    }
}
