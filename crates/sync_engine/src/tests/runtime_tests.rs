use super::*;
use async_trait::async_trait;
use remote_store::{MemoryStore, WriteKind};
use serde_json::json;
use shared::{
    domain::{Action, Gesture, NotificationStatus, SessionState, SyncStatus},
    protocol::NotificationPayload,
};
use std::time::Duration;
use tokio::sync::Semaphore;

const WAIT: Duration = Duration::from_secs(3);

/// Records payloads; each dispatch waits for a permit when gated.
struct RecordingNotifier {
    sent: Mutex<Vec<NotificationPayload>>,
    gate: Option<Arc<Semaphore>>,
    fail_first: Mutex<bool>,
}

impl RecordingNotifier {
    fn open() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            gate: None,
            fail_first: Mutex::new(false),
        })
    }

    fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            gate: Some(gate),
            fail_first: Mutex::new(false),
        })
    }

    fn failing_once() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            gate: None,
            fail_first: Mutex::new(true),
        })
    }

    async fn sent(&self) -> Vec<NotificationPayload> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn dispatch(&self, payload: &NotificationPayload) -> Result<(), DispatchError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }
        self.sent.lock().await.push(payload.clone());
        let mut fail = self.fail_first.lock().await;
        if std::mem::take(&mut *fail) {
            return Err(DispatchError::Status(502));
        }
        Ok(())
    }
}

fn seeded_store() -> MemoryStore {
    let mappings = serde_json::to_value(GestureMapping::default()).expect("serialize");
    MemoryStore::with_root(json!({
        "settings": {"mappings": mappings},
        "system": {"hardware": {"mouse_nav": true, "left_click": false, "right_click": false}}
    }))
}

async fn start(store: &MemoryStore, notifier: Arc<RecordingNotifier>) -> EngineHandle {
    SyncEngine::new(Arc::new(store.clone()), notifier)
        .start()
        .await
        .expect("engine starts")
}

async fn eventually(
    engine: &EngineHandle,
    condition: impl Fn(&EngineSnapshot) -> bool,
) -> EngineSnapshot {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let snapshot = engine.snapshot().await.expect("engine running");
        if condition(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached, last snapshot: {snapshot:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn next_matching(
    events: &mut broadcast::Receiver<EngineEvent>,
    matches: impl Fn(&EngineEvent) -> bool,
) -> EngineEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event stream open");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event before timeout")
}

#[tokio::test]
async fn operator_change_is_written_confirmed_and_notified() {
    let store = seeded_store();
    let notifier = RecordingNotifier::open();
    let engine = start(&store, Arc::clone(&notifier)).await;

    engine.set_action("one", "snapshot").await.expect("valid");
    let snapshot = eventually(&engine, |snapshot| {
        snapshot.sync_status == SyncStatus::Confirmed
            && snapshot.notification_status == NotificationStatus::Synced
    })
    .await;
    assert_eq!(snapshot.mapping.get(Gesture::One), Action::Snapshot);

    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].mappings().get(Gesture::One), Action::Snapshot);
    assert_eq!(sent[0].metadata().mode, OperatingMode::Mapping);

    let writes = store.writes().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].kind, WriteKind::Update);
    assert_eq!(writes[0].path, "settings/mappings");
    assert_eq!(writes[0].value, json!({"one": "snapshot"}));
    assert_eq!(
        store.get("settings/mappings").await.expect("get")["one"],
        "snapshot"
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn identical_remote_rewrites_do_not_notify() {
    let store = seeded_store();
    let notifier = RecordingNotifier::open();
    let engine = start(&store, Arc::clone(&notifier)).await;

    let same = serde_json::to_value(GestureMapping::default()).expect("serialize");
    store.set("settings/mappings", same.clone()).await.expect("set");
    store.set("settings/mappings", same).await.expect("set");
    store
        .set("system/current_gesture", json!("fist"))
        .await
        .expect("set");

    eventually(&engine, |snapshot| {
        snapshot.current_gesture.as_deref() == Some("fist")
    })
    .await;
    assert!(notifier.sent().await.is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn burst_during_flight_sends_one_follow_up_with_latest_state() {
    let store = seeded_store();
    let gate = Arc::new(Semaphore::new(0));
    let notifier = RecordingNotifier::gated(Arc::clone(&gate));
    let engine = start(&store, Arc::clone(&notifier)).await;

    engine.set_action("one", "snapshot").await.expect("valid");
    eventually(&engine, |snapshot| snapshot.dispatch_in_flight).await;
    for action in ["volume_up", "volume_down", "media_play", "none"] {
        engine.set_action("two", action).await.expect("valid");
    }

    gate.add_permits(10);
    eventually(&engine, |snapshot| {
        !snapshot.dispatch_in_flight
            && snapshot.notification_status == NotificationStatus::Synced
            && snapshot.sync_status == SyncStatus::Confirmed
    })
    .await;
    // Let any stray dispatch surface before counting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].mappings().get(Gesture::Two), Action::MediaPlay);
    assert_eq!(sent[1].mappings().get(Gesture::Two), Action::Unmapped);
    assert_eq!(sent[1].mappings().get(Gesture::One), Action::Snapshot);

    engine.shutdown().await;
}

#[tokio::test]
async fn rejected_write_reports_error_and_rolls_back() {
    let store = seeded_store();
    let engine = start(&store, RecordingNotifier::open()).await;
    let mut events = engine.subscribe_events();
    store.reject_writes(Some("permission denied".into())).await;

    engine.set_action("fist", "asl_mode_toggle").await.expect("valid");
    let error = next_matching(&mut events, |event| matches!(event, EngineEvent::Error(_))).await;
    let EngineEvent::Error(SyncError::RemoteWriteFailed { path, message }) = &error else {
        panic!("expected a write failure, got {error:?}");
    };
    assert_eq!(path.as_str(), "settings/mappings");
    assert!(message.contains("permission denied"));

    let snapshot = eventually(&engine, |snapshot| snapshot.sync_status == SyncStatus::Error).await;
    assert_eq!(snapshot.mapping.get(Gesture::Fist), Action::TabSwitch);

    engine.shutdown().await;
}

#[tokio::test]
async fn failed_notification_can_be_retried() {
    let store = seeded_store();
    let notifier = RecordingNotifier::failing_once();
    let engine = start(&store, Arc::clone(&notifier)).await;

    engine.set_action("three", "tab_switch").await.expect("valid");
    eventually(&engine, |snapshot| {
        snapshot.notification_status == NotificationStatus::Error
    })
    .await;

    engine.force_sync().await.expect("running");
    let snapshot = eventually(&engine, |snapshot| {
        snapshot.notification_status == NotificationStatus::Synced
    })
    .await;
    assert_eq!(snapshot.mapping.get(Gesture::Three), Action::TabSwitch);
    assert_eq!(notifier.sent().await.len(), 2);

    engine.shutdown().await;
}

#[tokio::test]
async fn entering_calibration_writes_session_then_switches() {
    let store = seeded_store();
    let engine = start(&store, RecordingNotifier::open()).await;

    engine
        .enter_mode(OperatingMode::Calibration)
        .await
        .expect("running");
    let snapshot = eventually(&engine, |snapshot| {
        snapshot.mode == OperatingMode::Calibration
            && snapshot.calibration.status == SessionState::Running
    })
    .await;
    assert_eq!(snapshot.calibration.exercises.len(), 4);
    assert_eq!(snapshot.sync_status, SyncStatus::Idle);
    assert_eq!(snapshot.notification_status, NotificationStatus::Idle);

    let stored = store.get("user/calibration").await.expect("get");
    assert_eq!(stored["status"], "running");
    assert_eq!(stored["progress"], 0.0);

    engine.shutdown().await;
}

#[tokio::test]
async fn export_returns_bytes_and_marks_downloaded() {
    let store = seeded_store();
    let engine = start(&store, RecordingNotifier::open()).await;

    let export = engine.export_local().await.expect("export");
    assert!(export.file_name.starts_with("omnicontrol-gestures-"));
    let parsed: Value = serde_json::from_slice(&export.bytes).expect("json");
    assert_eq!(parsed["metadata"]["sync_status"], "manual_download");

    let snapshot = engine.snapshot().await.expect("running");
    assert_eq!(snapshot.notification_status, NotificationStatus::Downloaded);

    engine.shutdown().await;
}

#[tokio::test]
async fn invalid_input_is_rejected_through_the_handle() {
    let store = seeded_store();
    let engine = start(&store, RecordingNotifier::open()).await;

    assert_eq!(
        engine.set_action("one", "warp_drive").await,
        Err(SyncError::InvalidAction("warp_drive".into()))
    );
    assert!(store.writes().await.is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_the_engine() {
    let store = seeded_store();
    let notifier = RecordingNotifier::open();
    let engine = start(&store, Arc::clone(&notifier)).await;
    let other = engine.clone();

    engine.shutdown().await;

    assert_eq!(
        other.set_action("one", "snapshot").await,
        Err(SyncError::EngineStopped)
    );
    assert_eq!(other.snapshot().await.err(), Some(SyncError::EngineStopped));

    // Remote changes after shutdown reach nobody.
    store
        .set("settings/mappings", json!({"one": "media_play"}))
        .await
        .expect("set");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(notifier.sent().await.is_empty());
}

#[tokio::test]
async fn seeding_only_fills_an_empty_store() {
    let store = MemoryStore::new();
    assert!(seed_default_mappings(&store, false).await.expect("seed"));
    assert!(!seed_default_mappings(&store, false).await.expect("seed"));
    assert!(seed_default_mappings(&store, true).await.expect("seed"));

    let stored = store.get("settings/mappings").await.expect("get");
    assert_eq!(stored["thumbs_up"], "volume_up");
    assert_eq!(store.writes().await.len(), 2);
}
