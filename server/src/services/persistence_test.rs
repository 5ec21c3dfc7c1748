use super::*;
use crate::services::store::{MemoryRoomStore, NewRoom};
use crate::state::test_helpers;
use serde_json::json;
use whiteboard_frames::DrawingEventKind;

fn record(n: i64) -> DrawingRecord {
    DrawingRecord {
        kind: DrawingEventKind::ObjectModified,
        data: json!({"object": {"type": "rect", "left": n}, "objectId": "s1"}),
        user_id: "u1".into(),
        username: "Ada".into(),
        timestamp: n,
    }
}

fn fast_config() -> StoreWorkerConfig {
    StoreWorkerConfig { queue_capacity: 16, retries: 2, retry_base_ms: 1 }
}

async fn memory_room(store: &MemoryRoomStore) -> String {
    store
        .create_room(NewRoom { name: "r".into(), is_public: true, created_by: "owner".into() })
        .await
        .expect("create room")
        .id
}

#[test]
fn worker_config_follows_app_config() {
    let config = Config { store_queue_capacity: 3, store_retries: 4, store_retry_base_ms: 9, ..Config::default() };
    let worker = StoreWorkerConfig::from(&config);
    assert_eq!(worker.queue_capacity, 3);
    assert_eq!(worker.retries, 4);
    assert_eq!(worker.retry_base_ms, 9);
}

#[tokio::test]
async fn ops_are_applied_in_submission_order() {
    let store = Arc::new(MemoryRoomStore::new());
    let room_id = memory_room(&store).await;
    let (tx, _handle) = spawn_store_worker(store.clone(), fast_config());

    for n in 0..10 {
        tx.send(StoreOp::AppendEvent { room_id: room_id.clone(), record: record(n) }).await.expect("send");
    }
    assert!(flush(&tx).await);

    let log = store.event_log(&room_id).await.expect("log");
    let order: Vec<i64> = log.iter().map(|r| r.timestamp).collect();
    assert_eq!(order, (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn presence_op_overwrites_mirror() {
    let store = Arc::new(MemoryRoomStore::new());
    let room_id = memory_room(&store).await;
    let (tx, _handle) = spawn_store_worker(store.clone(), fast_config());

    let users = vec![PresenceEntry { user_id: "u1".into(), username: "Ada".into(), connection_id: "c1".into() }];
    tx.send(StoreOp::SetPresence { room_id: room_id.clone(), users: users.clone() }).await.expect("send");
    assert!(flush(&tx).await);

    assert_eq!(store.find_room(&room_id).await.expect("find").active_users, users);
}

#[tokio::test]
async fn failed_writes_do_not_stop_the_worker() {
    let store = Arc::new(MemoryRoomStore::new());
    let room_id = memory_room(&store).await;
    let (tx, _handle) = spawn_store_worker(store.clone(), fast_config());

    tx.send(StoreOp::AppendEvent { room_id: "missing".into(), record: record(0) }).await.expect("send");
    tx.send(StoreOp::AppendEvent { room_id: room_id.clone(), record: record(1) }).await.expect("send");
    assert!(flush(&tx).await);

    assert_eq!(store.event_log(&room_id).await.expect("log"), vec![record(1)]);
}

#[tokio::test]
async fn retryable_failures_are_retried_then_dropped() {
    let store: Arc<dyn RoomStore> = Arc::new(test_helpers::FailingStore);
    let (tx, _handle) = spawn_store_worker(store, fast_config());
    tx.send(StoreOp::SetPresence { room_id: "r".into(), users: Vec::new() }).await.expect("send");
    assert!(flush(&tx).await, "worker must survive failing writes");
}

#[tokio::test]
async fn worker_stops_when_senders_drop() {
    let store = Arc::new(MemoryRoomStore::new());
    let (tx, handle) = spawn_store_worker(store, fast_config());
    drop(tx);
    tokio::time::timeout(Duration::from_millis(500), handle)
        .await
        .expect("worker should stop")
        .expect("worker task should not panic");
}

#[tokio::test]
async fn flush_reports_stopped_worker() {
    let (tx, rx) = mpsc::channel::<StoreOp>(1);
    drop(rx);
    assert!(!flush(&tx).await);
}

// =============================================================================
// enqueue
// =============================================================================

#[tokio::test]
async fn enqueue_without_worker_is_noop() {
    let mut state = test_helpers::test_app_state();
    state.store_tx = None;
    enqueue(&state, StoreOp::AppendEvent { room_id: "r".into(), record: record(0) });
}

#[tokio::test]
async fn enqueue_reaches_the_store() {
    let state = test_helpers::test_app_state();
    let room_id = test_helpers::seed_room(&state).await;
    enqueue(&state, StoreOp::AppendEvent { room_id: room_id.clone(), record: record(7) });
    test_helpers::flush_store(&state).await;
    assert_eq!(state.store.event_log(&room_id).await.expect("log"), vec![record(7)]);
}

#[tokio::test]
async fn enqueue_full_queue_drops_op() {
    let mut state = test_helpers::test_app_state();
    let (tx, mut rx) = mpsc::channel::<StoreOp>(1);
    state.store_tx = Some(tx);

    enqueue(&state, StoreOp::AppendEvent { room_id: "r".into(), record: record(1) });
    enqueue(&state, StoreOp::AppendEvent { room_id: "r".into(), record: record(2) });

    let first = rx.recv().await.expect("first op queued");
    assert!(matches!(first, StoreOp::AppendEvent { record, .. } if record.timestamp == 1));
    assert!(rx.try_recv().is_err(), "second op should have been dropped");
}

#[tokio::test]
async fn enqueue_closed_queue_drops_op() {
    let mut state = test_helpers::test_app_state();
    let (tx, rx) = mpsc::channel::<StoreOp>(1);
    drop(rx);
    state.store_tx = Some(tx);
    enqueue(&state, StoreOp::SetPresence { room_id: "r".into(), users: Vec::new() });
}
