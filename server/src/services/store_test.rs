use super::*;
use serde_json::json;
use whiteboard_frames::DrawingEventKind;

fn new_room(name: &str, is_public: bool) -> NewRoom {
    NewRoom { name: name.into(), is_public, created_by: "owner".into() }
}

fn record(n: usize) -> DrawingRecord {
    DrawingRecord {
        kind: DrawingEventKind::ObjectAdded,
        data: json!({"object": {"type": "rect"}, "objectId": format!("s{n}")}),
        user_id: "u1".into(),
        username: "Ada".into(),
        timestamp: i64::try_from(n).unwrap_or_default(),
    }
}

fn clear_record() -> DrawingRecord {
    DrawingRecord { kind: DrawingEventKind::Clear, data: json!({}), user_id: "u2".into(), username: "Bo".into(), timestamp: -1 }
}

// =============================================================================
// StoreError
// =============================================================================

#[test]
fn store_error_codes() {
    let not_found = StoreError::NotFound("r1".into());
    assert_eq!(not_found.error_code(), "E_ROOM_NOT_FOUND");
    assert!(!not_found.retryable());

    let db = StoreError::Database(sqlx::Error::PoolTimedOut);
    assert_eq!(db.error_code(), "E_DATABASE");
    assert!(db.retryable());
}

#[test]
fn presence_entry_uses_camel_case() {
    let entry = PresenceEntry { user_id: "u1".into(), username: "Ada".into(), connection_id: "c1".into() };
    assert_eq!(
        serde_json::to_value(&entry).expect("serialize"),
        json!({"userId": "u1", "username": "Ada", "connectionId": "c1"})
    );
}

// =============================================================================
// MemoryRoomStore
// =============================================================================

#[tokio::test]
async fn create_then_find_room() {
    let store = MemoryRoomStore::new();
    let created = store.create_room(new_room("Sketch", true)).await.expect("create");
    assert!(Uuid::parse_str(&created.id).is_ok());
    assert!(created.canvas_data.is_none());
    assert!(created.active_users.is_empty());

    let found = store.find_room(&created.id).await.expect("find");
    assert_eq!(found, created);
}

#[tokio::test]
async fn missing_room_is_not_found_everywhere() {
    let store = MemoryRoomStore::new();
    assert!(matches!(store.find_room("nope").await, Err(StoreError::NotFound(id)) if id == "nope"));
    assert!(matches!(store.append_event("nope", &record(0), EVENT_LOG_CAP).await, Err(StoreError::NotFound(_))));
    assert!(matches!(store.event_log("nope").await, Err(StoreError::NotFound(_))));
    assert!(matches!(store.set_presence("nope", &[]).await, Err(StoreError::NotFound(_))));
    assert!(matches!(store.save_snapshot("nope", "{}").await, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn public_listing_is_newest_first_and_limited() {
    let store = MemoryRoomStore::new();
    let mut public_ids = Vec::new();
    for i in 0..5 {
        public_ids.push(store.create_room(new_room(&format!("room {i}"), true)).await.expect("create").id);
    }
    store.create_room(new_room("hidden", false)).await.expect("create private");

    let listed = store.list_public_rooms(3).await.expect("list");
    let listed_ids: Vec<&str> = listed.iter().map(|room| room.id.as_str()).collect();
    let expected: Vec<&str> = public_ids.iter().rev().take(3).map(String::as_str).collect();
    assert_eq!(listed_ids, expected);
    assert!(listed.iter().all(|room| room.is_public));
}

#[tokio::test]
async fn event_log_keeps_newest_entries_at_cap() {
    let store = MemoryRoomStore::new();
    let room = store.create_room(new_room("busy", true)).await.expect("create");

    for n in 0..EVENT_LOG_CAP {
        store.append_event(&room.id, &record(n), EVENT_LOG_CAP).await.expect("append");
    }
    let len = store.append_event(&room.id, &clear_record(), EVENT_LOG_CAP).await.expect("append clear");
    assert_eq!(len, EVENT_LOG_CAP);

    let log = store.event_log(&room.id).await.expect("log");
    assert_eq!(log.len(), EVENT_LOG_CAP);
    assert_eq!(log[0], record(1));
    assert_eq!(log.last(), Some(&clear_record()));
}

#[tokio::test]
async fn small_cap_trims_on_every_append() {
    let store = MemoryRoomStore::new();
    let room = store.create_room(new_room("tiny", true)).await.expect("create");
    for n in 0..5 {
        let len = store.append_event(&room.id, &record(n), 2).await.expect("append");
        assert!(len <= 2);
    }
    let log = store.event_log(&room.id).await.expect("log");
    assert_eq!(log, vec![record(3), record(4)]);
}

#[tokio::test]
async fn presence_and_snapshot_are_overwritten() {
    let store = MemoryRoomStore::new();
    let room = store.create_room(new_room("r", true)).await.expect("create");
    let users = vec![PresenceEntry { user_id: "u1".into(), username: "Ada".into(), connection_id: "c1".into() }];

    store.set_presence(&room.id, &users).await.expect("presence");
    store.save_snapshot(&room.id, r#"{"objects":[1]}"#).await.expect("first save");
    store.save_snapshot(&room.id, r#"{"objects":[2]}"#).await.expect("second save");

    let found = store.find_room(&room.id).await.expect("find");
    assert_eq!(found.active_users, users);
    assert_eq!(found.canvas_data.as_deref(), Some(r#"{"objects":[2]}"#));

    store.set_presence(&room.id, &[]).await.expect("clear presence");
    assert!(store.find_room(&room.id).await.expect("find").active_users.is_empty());
}

// =============================================================================
// PgRoomStore (live database)
// =============================================================================

#[cfg(feature = "live-db-tests")]
async fn live_store() -> PgRoomStore {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set for live-db-tests");
    let pool = crate::db::init_pool(&url, 2).await.expect("live db init");
    PgRoomStore::new(pool)
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
async fn live_round_trip_room_presence_and_snapshot() {
    let store = live_store().await;
    let room = store.create_room(new_room("live", true)).await.expect("create");
    let users = vec![PresenceEntry { user_id: "u1".into(), username: "Ada".into(), connection_id: "c1".into() }];
    store.set_presence(&room.id, &users).await.expect("presence");
    store.save_snapshot(&room.id, "{}").await.expect("snapshot");

    let found = store.find_room(&room.id).await.expect("find");
    assert_eq!(found.active_users, users);
    assert_eq!(found.canvas_data.as_deref(), Some("{}"));
    assert!(matches!(store.find_room("missing-room").await, Err(StoreError::NotFound(_))));
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
async fn live_append_trims_to_cap() {
    let store = live_store().await;
    let room = store.create_room(new_room("live-log", false)).await.expect("create");
    for n in 0..5 {
        store.append_event(&room.id, &record(n), 3).await.expect("append");
    }
    let log = store.event_log(&room.id).await.expect("log");
    assert_eq!(log, vec![record(2), record(3), record(4)]);
}
