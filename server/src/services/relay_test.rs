use super::*;
use crate::services::presence::SessionHandle;
use crate::services::store::EVENT_LOG_CAP;
use crate::state::test_helpers::{self, assert_no_event, recv_event, test_session};
use serde_json::json;
use tokio::sync::mpsc;
use whiteboard_frames::{Empty, PresenceNotice};

fn join(room_id: &str, user_id: &str, username: &str) -> ClientEvent {
    ClientEvent::JoinRoom(JoinRoom { room_id: room_id.into(), user_id: user_id.into(), username: username.into() })
}

fn add_shape(id: &str) -> ClientEvent {
    ClientEvent::DrawingEvent(DrawingEvent {
        kind: DrawingEventKind::ObjectAdded,
        data: json!({"object": {"type": "rect", "left": 1}, "objectId": id}),
    })
}

async fn joined_pair(state: &AppState, room_id: &str) -> ((SessionHandle, mpsc::Receiver<ServerEvent>), (SessionHandle, mpsc::Receiver<ServerEvent>)) {
    let (a, mut ra) = test_session();
    let (b, mut rb) = test_session();
    dispatch(state, &a, join(room_id, "ua", "A")).await;
    dispatch(state, &b, join(room_id, "ub", "B")).await;
    recv_event(&mut ra).await;
    assert_no_event(&mut rb).await;
    ((a, ra), (b, rb))
}

// =============================================================================
// JOIN / LEAVE
// =============================================================================

#[tokio::test]
async fn join_replies_room_joined_and_notifies_peers() {
    let state = test_helpers::test_app_state();
    let room_id = test_helpers::seed_room(&state).await;
    let (a, mut ra) = test_session();
    let (b, _rb) = test_session();

    let reply = dispatch(&state, &a, join(&room_id, "ua", "A")).await;
    assert_eq!(reply, vec![ServerEvent::RoomJoined(RoomJoined { room_id: room_id.clone(), user_count: 1 })]);

    let reply = dispatch(&state, &b, join(&room_id, "ub", "B")).await;
    assert_eq!(reply, vec![ServerEvent::RoomJoined(RoomJoined { room_id: room_id.clone(), user_count: 2 })]);
    assert_eq!(
        recv_event(&mut ra).await,
        ServerEvent::UserJoined(PresenceNotice { user_id: "ub".into(), username: "B".into(), user_count: 2 })
    );
}

#[tokio::test]
async fn join_requires_room_and_user() {
    let state = test_helpers::test_app_state();
    let (a, _ra) = test_session();
    let reply = dispatch(&state, &a, join(" ", "ua", "A")).await;
    assert!(matches!(&reply[..], [ServerEvent::Error(_)]));
    assert!(state.presence.read().await.binding(a.id).is_none());
}

#[tokio::test]
async fn join_defaults_blank_username_to_user_id() {
    let state = test_helpers::test_app_state();
    let (a, _ra) = test_session();
    dispatch(&state, &a, join("r1", "ua", "")).await;
    assert_eq!(state.presence.read().await.binding(a.id).map(|b| b.username), Some("ua".to_owned()));
}

#[tokio::test]
async fn leave_room_notifies_remaining_members() {
    let state = test_helpers::test_app_state();
    let ((a, _ra), (b, mut rb)) = joined_pair(&state, "r1").await;

    assert!(dispatch(&state, &a, ClientEvent::LeaveRoom(Empty {})).await.is_empty());
    assert_eq!(
        recv_event(&mut rb).await,
        ServerEvent::UserLeft(PresenceNotice { user_id: "ua".into(), username: "A".into(), user_count: 1 })
    );

    disconnect(&state, &b).await;
    assert_eq!(state.presence.read().await.room_count(), 0);
}

// =============================================================================
// DRAWING
// =============================================================================

#[tokio::test]
async fn drawing_event_reaches_every_other_member_once() {
    let state = test_helpers::test_app_state();
    let room_id = test_helpers::seed_room(&state).await;
    let ((a, mut ra), (_b, mut rb)) = joined_pair(&state, &room_id).await;
    let (c, mut rc) = test_session();
    dispatch(&state, &c, join(&room_id, "uc", "C")).await;
    recv_event(&mut ra).await;
    recv_event(&mut rb).await;

    let reply = dispatch(&state, &a, add_shape("s1")).await;
    assert!(reply.is_empty());

    for rx in [&mut rb, &mut rc] {
        let ServerEvent::DrawingEvent(record) = recv_event(rx).await else {
            panic!("expected drawing event");
        };
        assert_eq!(record.kind, DrawingEventKind::ObjectAdded);
        assert_eq!(record.data["objectId"], json!("s1"));
        assert_eq!((record.user_id.as_str(), record.username.as_str()), ("ua", "A"));
        assert!(record.timestamp > 0);
        assert_no_event(rx).await;
    }
    assert_no_event(&mut ra).await;
}

#[tokio::test]
async fn hyphenated_kind_from_the_wire_is_relayed() {
    let state = test_helpers::test_app_state();
    let room_id = test_helpers::seed_room(&state).await;
    let ((a, mut ra), (_b, mut rb)) = joined_pair(&state, &room_id).await;

    let text = r#"{"event":"drawing-event","data":{"type":"object-added","data":{"object":{"type":"rect"},"objectId":"s1"}}}"#;
    let event = whiteboard_frames::decode_client(text).expect("decode");
    assert!(dispatch(&state, &a, event).await.is_empty());

    let ServerEvent::DrawingEvent(record) = recv_event(&mut rb).await else {
        panic!("expected drawing event");
    };
    assert_eq!(record.kind, DrawingEventKind::ObjectAdded);
    assert_eq!(record.data["objectId"], json!("s1"));
    assert_no_event(&mut ra).await;

    test_helpers::flush_store(&state).await;
    let log = state.store.event_log(&room_id).await.expect("log");
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, DrawingEventKind::ObjectAdded);
}

#[tokio::test]
async fn drawing_events_are_appended_to_the_log() {
    let state = test_helpers::test_app_state();
    let room_id = test_helpers::seed_room(&state).await;
    let ((a, _ra), _b) = joined_pair(&state, &room_id).await;

    dispatch(&state, &a, add_shape("s1")).await;
    dispatch(&state, &a, add_shape("s2")).await;
    dispatch(&state, &a, ClientEvent::ClearCanvas(Empty {})).await;
    test_helpers::flush_store(&state).await;

    let log = state.store.event_log(&room_id).await.expect("log");
    let kinds: Vec<DrawingEventKind> = log.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, [DrawingEventKind::ObjectAdded, DrawingEventKind::ObjectAdded, DrawingEventKind::Clear]);
    assert_eq!(log[1].data["objectId"], json!("s2"));
    assert!(log.iter().all(|r| r.user_id == "ua"));
}

#[tokio::test]
async fn log_stays_bounded_under_relay() {
    let state = test_helpers::test_app_state();
    let room_id = test_helpers::seed_room(&state).await;
    let (a, _ra) = test_session();
    dispatch(&state, &a, join(&room_id, "ua", "A")).await;

    for n in 0..=EVENT_LOG_CAP {
        dispatch(&state, &a, add_shape(&format!("s{n}"))).await;
        if n % 500 == 0 {
            test_helpers::flush_store(&state).await;
        }
    }
    test_helpers::flush_store(&state).await;

    let log = state.store.event_log(&room_id).await.expect("log");
    assert_eq!(log.len(), EVENT_LOG_CAP);
    assert_eq!(log[0].data["objectId"], json!("s1"));
    assert_eq!(log[EVENT_LOG_CAP - 1].data["objectId"], json!(format!("s{EVENT_LOG_CAP}")));
}

#[tokio::test]
async fn clear_canvas_notifies_others_only() {
    let state = test_helpers::test_app_state();
    let ((a, mut ra), (_b, mut rb)) = joined_pair(&state, "r1").await;

    assert!(dispatch(&state, &a, ClientEvent::ClearCanvas(Empty {})).await.is_empty());
    assert_eq!(
        recv_event(&mut rb).await,
        ServerEvent::CanvasCleared(Author { user_id: "ua".into(), username: "A".into() })
    );
    assert_no_event(&mut ra).await;
}

#[tokio::test]
async fn events_before_join_are_discarded() {
    let state = test_helpers::test_app_state();
    let room_id = test_helpers::seed_room(&state).await;
    let (b, mut rb) = test_session();
    dispatch(&state, &b, join(&room_id, "ub", "B")).await;
    let (stranger, _rs) = test_session();

    assert!(dispatch(&state, &stranger, add_shape("s1")).await.is_empty());
    assert!(dispatch(&state, &stranger, ClientEvent::ClearCanvas(Empty {})).await.is_empty());
    let chat = ClientEvent::ChatMessage(ChatMessage { message: "hi".into(), user_id: None, username: None });
    assert!(dispatch(&state, &stranger, chat).await.is_empty());
    let save = ClientEvent::SaveCanvas(SaveCanvas { canvas_data: json!({"objects": []}) });
    assert!(dispatch(&state, &stranger, save).await.is_empty());

    assert_no_event(&mut rb).await;
    test_helpers::flush_store(&state).await;
    assert!(state.store.event_log(&room_id).await.expect("log").is_empty());
}

#[tokio::test]
async fn concurrent_sessions_keep_their_own_order() {
    let state = test_helpers::test_app_state();
    let ((a, _ra), (b, _rb)) = joined_pair(&state, "r1").await;
    let (watcher, mut rw) = test_session();
    dispatch(&state, &watcher, join("r1", "uw", "W")).await;

    let from_a = async {
        for n in 0..20 {
            dispatch(&state, &a, add_shape(&format!("a{n}"))).await;
        }
    };
    let from_b = async {
        for n in 0..20 {
            dispatch(&state, &b, add_shape(&format!("b{n}"))).await;
        }
    };
    tokio::join!(from_a, from_b);

    let mut seen_a = Vec::new();
    let mut seen_b = Vec::new();
    for _ in 0..40 {
        let ServerEvent::DrawingEvent(record) = recv_event(&mut rw).await else {
            panic!("expected drawing event");
        };
        let id = record.data["objectId"].as_str().unwrap_or_default().to_owned();
        if record.user_id == "ua" {
            seen_a.push(id);
        } else {
            seen_b.push(id);
        }
    }

    // Interleaving across sessions is unspecified; each session's own order holds.
    assert_eq!(seen_a, (0..20).map(|n| format!("a{n}")).collect::<Vec<_>>());
    assert_eq!(seen_b, (0..20).map(|n| format!("b{n}")).collect::<Vec<_>>());
}

// =============================================================================
// CHAT / TYPING
// =============================================================================

fn chat(message: &str) -> ClientEvent {
    ClientEvent::ChatMessage(ChatMessage { message: message.into(), user_id: None, username: None })
}

async fn recv_chat(rx: &mut mpsc::Receiver<ServerEvent>) -> ChatBroadcast {
    let ServerEvent::ChatMessage(chat) = recv_event(rx).await else {
        panic!("expected chat-message");
    };
    chat
}

#[tokio::test]
async fn chat_reaches_sender_and_peers_with_server_identity() {
    let state = test_helpers::test_app_state();
    let ((a, mut ra), (_b, mut rb)) = joined_pair(&state, "r1").await;

    let spoofed = ClientEvent::ChatMessage(ChatMessage {
        message: "hello".into(),
        user_id: Some("spoofed".into()),
        username: Some("Mallory".into()),
    });
    assert!(dispatch(&state, &a, spoofed).await.is_empty());

    let own = recv_chat(&mut ra).await;
    assert_eq!((own.user_id.as_str(), own.username.as_str(), own.message.as_str()), ("ua", "A", "hello"));
    assert_eq!(recv_chat(&mut rb).await, own);
}

#[tokio::test]
async fn own_chat_is_queued_behind_earlier_peer_chat() {
    let state = test_helpers::test_app_state();
    let ((a, mut ra), (b, mut rb)) = joined_pair(&state, "r1").await;

    dispatch(&state, &b, chat("first from b")).await;
    dispatch(&state, &a, chat("then from a")).await;

    let order: Vec<String> = vec![recv_chat(&mut ra).await.message, recv_chat(&mut ra).await.message];
    assert_eq!(order, ["first from b", "then from a"]);
    let order: Vec<String> = vec![recv_chat(&mut rb).await.message, recv_chat(&mut rb).await.message];
    assert_eq!(order, ["first from b", "then from a"]);
    assert_no_event(&mut ra).await;
}

#[tokio::test]
async fn typing_goes_to_others_only() {
    let state = test_helpers::test_app_state();
    let ((a, mut ra), (_b, mut rb)) = joined_pair(&state, "r1").await;

    let typing = ClientEvent::UserTyping(UserTyping { user_id: None, username: None, is_typing: true });
    assert!(dispatch(&state, &a, typing).await.is_empty());
    assert_eq!(
        recv_event(&mut rb).await,
        ServerEvent::UserTyping(TypingBroadcast { user_id: "ua".into(), username: "A".into(), is_typing: true })
    );
    assert_no_event(&mut ra).await;
}

// =============================================================================
// SAVE
// =============================================================================

#[tokio::test]
async fn save_canvas_overwrites_snapshot_and_acks_sender() {
    let state = test_helpers::test_app_state();
    let room_id = test_helpers::seed_room(&state).await;
    let ((a, _ra), (_b, mut rb)) = joined_pair(&state, &room_id).await;

    for left in [1, 2] {
        let save = ClientEvent::SaveCanvas(SaveCanvas { canvas_data: json!({"objects": [{"type": "rect", "left": left}]}) });
        let reply = dispatch(&state, &a, save).await;
        assert_eq!(reply, vec![ServerEvent::CanvasSaved(CanvasSaved { success: true, error: None })]);
    }
    assert_no_event(&mut rb).await;

    let room = state.store.find_room(&room_id).await.expect("room");
    let blob: serde_json::Value = serde_json::from_str(room.canvas_data.as_deref().expect("snapshot")).expect("json");
    assert_eq!(blob["objects"][0]["left"], json!(2));
}

#[tokio::test]
async fn save_canvas_for_unknown_room_reports_failure() {
    let state = test_helpers::test_app_state();
    let (a, _ra) = test_session();
    dispatch(&state, &a, join("not-created", "ua", "A")).await;

    let reply = dispatch(&state, &a, ClientEvent::SaveCanvas(SaveCanvas { canvas_data: json!({}) })).await;
    let [ServerEvent::CanvasSaved(saved)] = &reply[..] else {
        panic!("expected canvas-saved");
    };
    assert!(!saved.success);
    assert!(saved.error.as_deref().is_some_and(|e| e.contains("not-created")));
}

#[tokio::test]
async fn save_canvas_store_failure_is_reported() {
    let state = test_helpers::test_app_state_with_store(std::sync::Arc::new(test_helpers::FailingStore));
    let (a, _ra) = test_session();
    dispatch(&state, &a, join("r1", "ua", "A")).await;

    let reply = dispatch(&state, &a, ClientEvent::SaveCanvas(SaveCanvas { canvas_data: json!({}) })).await;
    assert!(matches!(&reply[..], [ServerEvent::CanvasSaved(CanvasSaved { success: false, error: Some(_) })]));
}
