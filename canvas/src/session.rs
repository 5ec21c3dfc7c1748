//! Room session: client-side glue between the event channel and the canvas.
//!
//! A `RoomSession` owns the reconciler and tracks the state a whiteboard UI
//! shows around the canvas: connection status, room membership, headcount,
//! chat history, who is typing and the outcome of the last save. Inbound
//! server events are routed through [`RoomSession::handle`]; outbound
//! requests go through the reconciler's sink.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;
use tracing::{debug, info, warn};
use whiteboard_frames::{
    CanvasSaved, ChatBroadcast, ChatMessage, ClientEvent, Empty, JoinRoom, RoomId, ServerEvent, UserTyping,
};

use crate::doc::{CanvasSnapshot, SceneError};
use crate::engine::SceneEngine;
use crate::reconciler::{CanvasReconciler, EventSink};

/// Chat lines kept in memory per session.
pub const MAX_CHAT_HISTORY: usize = 200;

/// State of the underlying event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected { session_id: String },
    Disconnected { reason: String },
    Failed { message: String },
}

pub struct RoomSession<E, S> {
    reconciler: CanvasReconciler<E, S>,
    user_id: String,
    username: String,
    room_id: Option<RoomId>,
    user_count: usize,
    status: ConnectionStatus,
    chat: VecDeque<ChatBroadcast>,
    typing: BTreeMap<String, String>,
    last_save: Option<CanvasSaved>,
    last_error: Option<String>,
}

impl<E: SceneEngine, S: EventSink> RoomSession<E, S> {
    pub fn new(reconciler: CanvasReconciler<E, S>, user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            reconciler,
            user_id: user_id.into(),
            username: username.into(),
            room_id: None,
            user_count: 0,
            status: ConnectionStatus::Connecting,
            chat: VecDeque::new(),
            typing: BTreeMap::new(),
            last_save: None,
            last_error: None,
        }
    }

    // --- Accessors ---

    #[must_use]
    pub fn reconciler(&self) -> &CanvasReconciler<E, S> {
        &self.reconciler
    }

    pub fn reconciler_mut(&mut self) -> &mut CanvasReconciler<E, S> {
        &mut self.reconciler
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    #[must_use]
    pub fn user_count(&self) -> usize {
        self.user_count
    }

    #[must_use]
    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    #[must_use]
    pub fn chat(&self) -> &VecDeque<ChatBroadcast> {
        &self.chat
    }

    /// Usernames currently typing, ordered by user id.
    pub fn typing_users(&self) -> impl Iterator<Item = &str> {
        self.typing.values().map(String::as_str)
    }

    #[must_use]
    pub fn last_save(&self) -> Option<&CanvasSaved> {
        self.last_save.as_ref()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    // --- Outbound ---

    /// Bind this session to a room. Room-scoped UI state is reset.
    pub fn join(&mut self, room_id: impl Into<RoomId>) {
        let room_id = room_id.into();
        self.chat.clear();
        self.typing.clear();
        self.user_count = 0;
        self.room_id = Some(room_id.clone());
        self.reconciler.sink_mut().send(ClientEvent::JoinRoom(JoinRoom {
            room_id,
            user_id: self.user_id.clone(),
            username: self.username.clone(),
        }));
    }

    /// Leave the current room. No-op when not joined.
    pub fn leave(&mut self) {
        if self.room_id.take().is_none() {
            return;
        }
        self.chat.clear();
        self.typing.clear();
        self.user_count = 0;
        self.reconciler.sink_mut().send(ClientEvent::LeaveRoom(Empty {}));
    }

    /// Send a chat line. Blank messages and sends outside a room are dropped.
    pub fn send_chat(&mut self, message: &str) -> bool {
        let message = message.trim();
        if message.is_empty() || self.room_id.is_none() {
            return false;
        }
        self.reconciler.sink_mut().send(ClientEvent::ChatMessage(ChatMessage {
            message: message.to_owned(),
            user_id: Some(self.user_id.clone()),
            username: Some(self.username.clone()),
        }));
        true
    }

    pub fn set_typing(&mut self, is_typing: bool) {
        if self.room_id.is_none() {
            return;
        }
        self.reconciler.sink_mut().send(ClientEvent::UserTyping(UserTyping {
            user_id: Some(self.user_id.clone()),
            username: Some(self.username.clone()),
            is_typing,
        }));
    }

    /// Ask the server to persist the current scene.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::Snapshot`] if the scene cannot be serialized.
    pub fn save_canvas(&mut self) -> Result<(), SceneError> {
        self.last_save = None;
        self.reconciler.save()
    }

    /// Load the room snapshot fetched over REST. `null` means the room has
    /// never been saved and leaves the scene as it is.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::Snapshot`] if the value is not a snapshot.
    pub fn hydrate(&mut self, canvas_data: &Value) -> Result<usize, SceneError> {
        if canvas_data.is_null() {
            return Ok(0);
        }
        let snapshot = CanvasSnapshot::deserialize_value(canvas_data)?;
        Ok(self.reconciler.load(snapshot))
    }

    // --- Inbound ---

    pub fn handle(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected(connected) => {
                info!(session_id = %connected.session_id, "session: connected");
                self.status = ConnectionStatus::Connected { session_id: connected.session_id };
            }
            ServerEvent::RoomJoined(joined) => {
                self.room_id = Some(joined.room_id);
                self.user_count = joined.user_count;
            }
            ServerEvent::UserJoined(notice) => {
                debug!(user_id = %notice.user_id, username = %notice.username, "session: user joined");
                self.user_count = notice.user_count;
            }
            ServerEvent::UserLeft(notice) => {
                debug!(user_id = %notice.user_id, username = %notice.username, "session: user left");
                self.user_count = notice.user_count;
                self.typing.remove(&notice.user_id);
            }
            ServerEvent::DrawingEvent(record) => self.reconciler.apply_remote(&record),
            ServerEvent::CanvasCleared(author) => {
                debug!(user_id = %author.user_id, "session: canvas cleared remotely");
                self.reconciler.apply_remote_clear();
            }
            ServerEvent::ChatMessage(line) => {
                self.typing.remove(&line.user_id);
                self.chat.push_back(line);
                while self.chat.len() > MAX_CHAT_HISTORY {
                    self.chat.pop_front();
                }
            }
            ServerEvent::UserTyping(typing) => {
                if typing.is_typing {
                    self.typing.insert(typing.user_id, typing.username);
                } else {
                    self.typing.remove(&typing.user_id);
                }
            }
            ServerEvent::CanvasSaved(saved) => {
                if !saved.success {
                    warn!(error = ?saved.error, "session: canvas save failed");
                }
                self.last_save = Some(saved);
            }
            ServerEvent::Error(notice) => {
                warn!(message = %notice.message, "session: server error");
                self.last_error = Some(notice.message);
            }
        }
    }

    /// The channel closed. Room binding is dropped; the next connection
    /// must join again.
    pub fn on_disconnected(&mut self, reason: impl Into<String>) {
        self.status = ConnectionStatus::Disconnected { reason: reason.into() };
        self.room_id = None;
        self.typing.clear();
    }

    pub fn on_connection_error(&mut self, message: impl Into<String>) {
        self.status = ConnectionStatus::Failed { message: message.into() };
    }
}
