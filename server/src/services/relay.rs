//! Event relay: routes inbound client events to the right recipients.
//!
//! DESIGN
//! ======
//! Handlers are pure business logic. They resolve the session's binding,
//! stamp identity and time, queue durable writes, and return an `Outcome`.
//! `dispatch` owns all outbound concerns: it fans the outcome out to the room
//! and returns the events the sender's own connection must write.
//!
//! Events from one session are dispatched one at a time by that session's
//! connection task, so they are relayed in arrival order. Nothing orders
//! events across sessions.
//!
//! ERROR HANDLING
//! ==============
//! Events from a session that has not joined a room are discarded with a
//! debug log. Log appends are fire-and-forget through the store worker.
//! `save-canvas` is the one operation whose store result is reported back,
//! as `canvas-saved{success:false}`.

use tracing::{debug, error, info};
use whiteboard_frames::{
    Author, CanvasSaved, ChatBroadcast, ChatMessage, ClientEvent, DrawingEvent, DrawingEventKind, DrawingRecord,
    JoinRoom, RoomJoined, SaveCanvas, ServerEvent, TypingBroadcast, UserTyping, now_ms,
};

use crate::error::ErrorCode;
use crate::services::persistence::{self, StoreOp};
use crate::services::presence::{self, SessionBinding, SessionHandle, SessionId};
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// What a handler wants delivered. Handlers never send directly.
#[derive(Debug)]
enum Outcome {
    /// Deliver to every room member, the sender included. The sender's copy
    /// goes through its own channel, behind anything already queued there.
    Broadcast(ServerEvent),
    /// Deliver to every room member except the sender.
    BroadcastExcludeSender(ServerEvent),
    /// Deliver to the sender only.
    Reply(ServerEvent),
    /// Nothing to deliver.
    Discard,
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Handle one inbound event and return the direct replies for the sender.
/// Room broadcasts, the sender's own copy included, go through channels.
pub async fn dispatch(state: &AppState, session: &SessionHandle, event: ClientEvent) -> Vec<ServerEvent> {
    let name = event.name();
    let outcome = match event {
        ClientEvent::JoinRoom(join) => handle_join(state, session, join).await,
        ClientEvent::LeaveRoom(_) => handle_leave(state, session).await,
        other => {
            let Some(binding) = binding_of(state, session).await else {
                debug!(session_id = %session.id, event = name, "relay: event from unjoined session discarded");
                return Vec::new();
            };
            handle_room_event(state, &binding, other).await
        }
    };

    apply_outcome(state, session, outcome).await
}

/// Tear down a closed connection.
pub async fn disconnect(state: &AppState, session: &SessionHandle) {
    if presence::leave_session(state, session.id).await.is_none() {
        debug!(session_id = %session.id, "relay: disconnect without room");
    }
}

async fn apply_outcome(state: &AppState, session: &SessionHandle, outcome: Outcome) -> Vec<ServerEvent> {
    match outcome {
        Outcome::Broadcast(event) => {
            fan_out(state, session, &event, None).await;
            Vec::new()
        }
        Outcome::BroadcastExcludeSender(event) => {
            fan_out(state, session, &event, Some(session.id)).await;
            Vec::new()
        }
        Outcome::Reply(event) => vec![event],
        Outcome::Discard => Vec::new(),
    }
}

async fn fan_out(state: &AppState, session: &SessionHandle, event: &ServerEvent, exclude: Option<SessionId>) {
    let registry = state.presence.read().await;
    let Some(binding) = registry.binding(session.id) else {
        return;
    };
    registry.broadcast(&binding.room_id, event, exclude);
}

async fn binding_of(state: &AppState, session: &SessionHandle) -> Option<SessionBinding> {
    state.presence.read().await.binding(session.id)
}

// =============================================================================
// MEMBERSHIP
// =============================================================================

async fn handle_join(state: &AppState, session: &SessionHandle, join: JoinRoom) -> Outcome {
    let room_id = join.room_id.trim();
    let user_id = join.user_id.trim();
    if room_id.is_empty() || user_id.is_empty() {
        return Outcome::Reply(ServerEvent::error("roomId and userId are required to join a room"));
    }
    let username = match join.username.trim() {
        "" => user_id,
        name => name,
    };

    let user_count = presence::join_room(state, session, room_id, user_id, username).await;
    Outcome::Reply(ServerEvent::RoomJoined(RoomJoined { room_id: room_id.to_owned(), user_count }))
}

async fn handle_leave(state: &AppState, session: &SessionHandle) -> Outcome {
    if presence::leave_session(state, session.id).await.is_none() {
        debug!(session_id = %session.id, "relay: leave-room without room");
    }
    Outcome::Discard
}

// =============================================================================
// ROOM EVENTS
// =============================================================================

async fn handle_room_event(state: &AppState, binding: &SessionBinding, event: ClientEvent) -> Outcome {
    match event {
        ClientEvent::DrawingEvent(drawing) => handle_drawing(state, binding, drawing),
        ClientEvent::ClearCanvas(_) => handle_clear(state, binding),
        ClientEvent::ChatMessage(chat) => handle_chat(binding, chat),
        ClientEvent::UserTyping(typing) => handle_typing(binding, typing),
        ClientEvent::SaveCanvas(save) => handle_save(state, binding, save).await,
        ClientEvent::JoinRoom(_) | ClientEvent::LeaveRoom(_) => Outcome::Discard,
    }
}

fn handle_drawing(state: &AppState, binding: &SessionBinding, drawing: DrawingEvent) -> Outcome {
    let record = DrawingRecord::stamp(drawing, &binding.user_id, &binding.username, now_ms());
    persistence::enqueue(state, StoreOp::AppendEvent { room_id: binding.room_id.clone(), record: record.clone() });
    Outcome::BroadcastExcludeSender(ServerEvent::DrawingEvent(record))
}

fn handle_clear(state: &AppState, binding: &SessionBinding) -> Outcome {
    let record = DrawingRecord {
        kind: DrawingEventKind::Clear,
        data: serde_json::json!({}),
        user_id: binding.user_id.clone(),
        username: binding.username.clone(),
        timestamp: now_ms(),
    };
    persistence::enqueue(state, StoreOp::AppendEvent { room_id: binding.room_id.clone(), record });
    info!(room_id = %binding.room_id, user_id = %binding.user_id, "relay: canvas cleared");
    Outcome::BroadcastExcludeSender(ServerEvent::CanvasCleared(Author {
        user_id: binding.user_id.clone(),
        username: binding.username.clone(),
    }))
}

fn handle_chat(binding: &SessionBinding, chat: ChatMessage) -> Outcome {
    Outcome::Broadcast(ServerEvent::ChatMessage(ChatBroadcast {
        user_id: binding.user_id.clone(),
        username: binding.username.clone(),
        message: chat.message,
        timestamp: now_ms(),
    }))
}

fn handle_typing(binding: &SessionBinding, typing: UserTyping) -> Outcome {
    Outcome::BroadcastExcludeSender(ServerEvent::UserTyping(TypingBroadcast {
        user_id: binding.user_id.clone(),
        username: binding.username.clone(),
        is_typing: typing.is_typing,
    }))
}

async fn handle_save(state: &AppState, binding: &SessionBinding, save: SaveCanvas) -> Outcome {
    let blob = match serde_json::to_string(&save.canvas_data) {
        Ok(blob) => blob,
        Err(e) => return Outcome::Reply(save_failed(e.to_string())),
    };

    match state.store.save_snapshot(&binding.room_id, &blob).await {
        Ok(()) => {
            info!(room_id = %binding.room_id, user_id = %binding.user_id, bytes = blob.len(), "relay: canvas saved");
            Outcome::Reply(ServerEvent::CanvasSaved(CanvasSaved { success: true, error: None }))
        }
        Err(e) => {
            error!(room_id = %binding.room_id, code = e.error_code(), error = %e, "relay: canvas save failed");
            Outcome::Reply(save_failed(e.to_string()))
        }
    }
}

fn save_failed(message: String) -> ServerEvent {
    ServerEvent::CanvasSaved(CanvasSaved { success: false, error: Some(message) })
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
