//! WebSocket handler: one task per connection.
//!
//! DESIGN
//! ======
//! On upgrade the connection gets a session id and enters a `select!` loop:
//! - inbound text messages are decoded and handed to the relay, and any
//!   events the relay returns for the sender are written straight back
//! - events fanned out by peers arrive on the session's bounded channel and
//!   are forwarded to the socket
//!
//! Inbound messages are handled one at a time, so a session's events reach
//! the relay in the order they were sent.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `connected{sessionId}`
//! 2. Client sends events → relay dispatch → replies / fan-out
//! 3. Close or socket error → leave the room, peers get `user-left`

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use whiteboard_frames::{Connected, ServerEvent, decode_client, encode_server};

use crate::services::presence::SessionHandle;
use crate::services::relay;
use crate::state::AppState;

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.client_channel_capacity);
    let session = SessionHandle { id: Uuid::new_v4(), tx };

    let welcome = ServerEvent::Connected(Connected { session_id: session.id.to_string() });
    if send_event(&mut socket, session.id, &welcome).await.is_err() {
        return;
    }
    info!(session_id = %session.id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &session, text.as_str()).await;
                        if send_all(&mut socket, session.id, &replies).await.is_err() {
                            break;
                        }
                    }
                    Message::Binary(_) => debug!(session_id = %session.id, "ws: binary frame ignored"),
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            Some(event) = rx.recv() => {
                if send_event(&mut socket, session.id, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    relay::disconnect(&state, &session).await;
    info!(session_id = %session.id, "ws: client disconnected");
}

/// Decode one inbound text message and return the events for the sender.
///
/// Kept apart from the socket so tests can drive dispatch directly.
async fn process_inbound_text(state: &AppState, session: &SessionHandle, text: &str) -> Vec<ServerEvent> {
    match decode_client(text) {
        Ok(event) => {
            debug!(session_id = %session.id, event = event.name(), "ws: recv");
            relay::dispatch(state, session, event).await
        }
        Err(e) => {
            warn!(session_id = %session.id, error = %e, "ws: invalid inbound message");
            vec![ServerEvent::error(format!("invalid message: {e}"))]
        }
    }
}

async fn send_all(socket: &mut WebSocket, session_id: Uuid, events: &[ServerEvent]) -> Result<(), ()> {
    for event in events {
        send_event(socket, session_id, event).await?;
    }
    Ok(())
}

async fn send_event(socket: &mut WebSocket, session_id: Uuid, event: &ServerEvent) -> Result<(), ()> {
    let json = match encode_server(event) {
        Ok(json) => json,
        Err(e) => {
            warn!(%session_id, event = event.name(), error = %e, "ws: failed to encode event");
            return Err(());
        }
    };
    socket.send(Message::Text(json.into())).await.map_err(|e| {
        debug!(%session_id, error = %e, "ws: send failed");
    })
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
