// tests/store_test.rs — Integration test: SQLite round-trip (units, detections, events)

use fieldwatch::db;
use fieldwatch::db::store::{DetectionRow, EventRow, Store, UnitLocation};
use fieldwatch::db::store_server::spawn_store_server;
use fieldwatch::db::DataSink;
use fieldwatch::detection::{Detection, HazardKind, Severity};

fn test_store() -> Store {
    db::in_memory().unwrap()
}

#[test]
fn test_unit_lifecycle() {
    let store = test_store();
    assert!(store.get_unit("engine-1").unwrap().is_none());
    assert!(!store.mark_unit_inactive("engine-1").unwrap());

    store.upsert_unit_status("engine-1", "active").unwrap();
    store
        .update_unit_location(&UnitLocation {
            unit_id: "engine-1".into(),
            latitude: 40.71,
            longitude: -74.0,
            accuracy_m: Some(8.0),
        })
        .unwrap();

    let unit = store.get_unit("engine-1").unwrap().unwrap();
    assert_eq!(unit.status, "active");
    assert_eq!(unit.latitude, Some(40.71));
    assert_eq!(unit.accuracy_m, Some(8.0));

    assert!(store.mark_unit_inactive("engine-1").unwrap());
    let unit = store.get_unit("engine-1").unwrap().unwrap();
    assert_eq!(unit.status, "inactive");
    // Location survives status changes.
    assert_eq!(unit.longitude, Some(-74.0));
}

#[test]
fn test_location_before_status_creates_active_unit() {
    let store = test_store();
    store
        .update_unit_location(&UnitLocation {
            unit_id: "ladder-3".into(),
            latitude: 1.0,
            longitude: 2.0,
            accuracy_m: None,
        })
        .unwrap();
    let unit = store.get_unit("ladder-3").unwrap().unwrap();
    assert_eq!(unit.status, "active");
    assert_eq!(unit.accuracy_m, None);
}

#[test]
fn test_detection_insert_is_idempotent() {
    let store = test_store();
    let d = Detection::new(HazardKind::Smoke, Severity::Medium, 0.6, "grey smoke", "stairwell");
    let row = DetectionRow::from_detection("engine-1", Some("sess-1"), &d);

    store.insert_detection(&row).unwrap();
    store.insert_detection(&row).unwrap();
    let other = Detection::new(HazardKind::Fire, Severity::High, 0.8, "flames", "roof");
    store
        .insert_detection(&DetectionRow::from_detection("engine-2", None, &other))
        .unwrap();

    assert_eq!(store.count_detections(None).unwrap(), 2);
    assert_eq!(store.count_detections(Some("engine-1")).unwrap(), 1);

    let payload: String = store
        .conn()
        .query_row(
            "SELECT payload FROM detections WHERE id = ?1",
            [&d.id],
            |r| r.get(0),
        )
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(json["type"], "smoke");
    assert_eq!(json["location"], "stairwell");
}

#[test]
fn test_recent_events_newest_first() {
    let store = test_store();
    for (i, kind) in ["unit_message", "urgent_alert", "command"].iter().enumerate() {
        let mut event = EventRow::new(Some("engine-1"), kind, format!("event {i}"));
        event.created_at = format!("2026-03-01T12:00:0{i}+00:00");
        store.insert_event(&event).unwrap();
    }
    let mut urgent = EventRow::new(None, "system", "restart")
        .with_priority("critical")
        .with_payload(&serde_json::json!({"reason": "test"}));
    urgent.created_at = "2026-03-01T12:00:09+00:00".into();
    store.insert_event(&urgent).unwrap();

    let events = store.recent_events(3).unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].event_type, "system");
    assert_eq!(events[0].priority.as_deref(), Some("critical"));
    assert_eq!(events[0].unit_id, None);
    assert_eq!(events[1].event_type, "command");
    assert_eq!(events[2].event_type, "urgent_alert");
}

#[tokio::test]
async fn test_store_actor_round_trip() {
    let (handle, join) = spawn_store_server(test_store());

    handle
        .upsert_unit_status("engine-5".into(), "active".into())
        .await
        .unwrap();
    let d = Detection::new(HazardKind::Child, Severity::Critical, 0.95, "child", "bedroom");
    handle
        .insert_detection(DetectionRow::from_detection("engine-5", Some("s"), &d))
        .await
        .unwrap();
    handle
        .insert_event(EventRow::new(Some("engine-5"), "urgent_alert", "Child in bedroom"))
        .await
        .unwrap();
    handle.mark_unit_inactive("engine-5".into()).await.unwrap();

    assert_eq!(handle.get_unit("engine-5").await.unwrap().unwrap().status, "inactive");
    assert_eq!(handle.count_detections(Some("engine-5")).await.unwrap(), 1);
    assert_eq!(handle.recent_events(10).await.unwrap().len(), 1);

    drop(handle);
    join.await.unwrap();
}
