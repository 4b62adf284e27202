use super::*;
use serde_json::json;
use std::time::Duration;

async fn next_value(subscription: &mut Subscription) -> Value {
    tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .expect("value before timeout")
        .expect("subscription still open")
}

#[test]
fn set_at_creates_and_deletes_nested_keys() {
    let mut root = json!({});
    set_at(&mut root, &segments("system/hardware/mouse_nav"), json!(false));
    assert_eq!(root, json!({"system": {"hardware": {"mouse_nav": false}}}));

    set_at(&mut root, &segments("system/hardware/mouse_nav"), Value::Null);
    assert_eq!(get_at(&root, &segments("system/hardware/mouse_nav")), Value::Null);
}

#[test]
fn merge_at_only_touches_given_keys() {
    let mut root = json!({"settings": {"mappings": {"one": "cursor_nav", "two": "media_play"}}});
    let fields = json!({"one": "snapshot"});
    merge_at(
        &mut root,
        &segments("settings/mappings"),
        fields.as_object().expect("object"),
    );
    assert_eq!(
        root,
        json!({"settings": {"mappings": {"one": "snapshot", "two": "media_play"}}})
    );
}

#[tokio::test]
async fn observe_delivers_current_value_then_changes() {
    let store = MemoryStore::with_root(json!({"system": {"current_gesture": "fist"}}));
    let mut subscription = store.observe("system/current_gesture").await.expect("observe");

    assert_eq!(next_value(&mut subscription).await, json!("fist"));

    store
        .set("system/current_gesture", json!("one"))
        .await
        .expect("set");
    assert_eq!(next_value(&mut subscription).await, json!("one"));
}

#[tokio::test]
async fn absent_documents_are_delivered_as_null() {
    let store = MemoryStore::new();
    let mut subscription = store.observe("user/rehab").await.expect("observe");
    assert_eq!(next_value(&mut subscription).await, Value::Null);
}

#[tokio::test]
async fn partial_write_pushes_whole_observed_document() {
    let store = MemoryStore::new();
    store
        .set("settings/mappings", json!({"one": "cursor_nav", "two": "media_play"}))
        .await
        .expect("seed");
    let mut subscription = store.observe("settings/mappings").await.expect("observe");
    next_value(&mut subscription).await;

    let mut fields = Map::new();
    fields.insert("two".into(), json!("volume_up"));
    store.update("settings/mappings", fields).await.expect("update");

    assert_eq!(
        next_value(&mut subscription).await,
        json!({"one": "cursor_nav", "two": "volume_up"})
    );
}

#[tokio::test]
async fn unrelated_writes_are_not_pushed() {
    let store = MemoryStore::new();
    let mut subscription = store.observe("user/calibration").await.expect("observe");
    next_value(&mut subscription).await;

    store.set("user/rehab", json!({"stage": 2})).await.expect("set");
    store
        .set("user/calibration", json!({"status": "running"}))
        .await
        .expect("set");

    assert_eq!(
        next_value(&mut subscription).await,
        json!({"status": "running"})
    );
}

#[tokio::test]
async fn rejected_writes_leave_document_untouched() {
    let store = MemoryStore::new();
    store.reject_writes(Some("offline".into())).await;

    let err = store
        .set("settings/mappings", json!({"one": "snapshot"}))
        .await
        .expect_err("rejected");
    assert!(err.to_string().contains("offline"));
    assert_eq!(store.get("settings/mappings").await.expect("get"), Value::Null);
    assert_eq!(store.snapshot().await, json!({}));
    assert!(store.writes().await.is_empty());
}

#[tokio::test]
async fn stopped_subscription_receives_nothing_more() {
    let store = MemoryStore::new();
    let mut subscription = store.observe("system/hardware").await.expect("observe");
    next_value(&mut subscription).await;
    subscription.stop();

    store
        .set("system/hardware", json!({"mouse_nav": false}))
        .await
        .expect("set");
    assert!(subscription.next().await.is_none());
    assert!(!subscription.is_active());
}
