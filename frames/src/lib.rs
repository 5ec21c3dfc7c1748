//! Shared event model and JSON codec for the realtime whiteboard transport.
//!
//! This crate owns the wire representation used by both `server` and the
//! client crates. Every WebSocket text message is a single JSON object
//! `{"event": "<name>", "data": {...}}`, with camelCase keys inside `data`.
//!
//! Event kinds are closed enums so that adding a new kind is a compile-time
//! checked change in every dispatcher. Drawing payloads stay flexible
//! (`serde_json::Value`): the relay forwards them verbatim and only the
//! client reconciler decodes them (see [`DrawingEvent::action`]).

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of a shape on the canvas. Assigned once at creation and carried
/// in every later reference to that shape.
pub type ShapeId = String;

/// Opaque room identifier.
pub type RoomId = String;

/// Error returned by the decode functions.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text is not valid JSON or does not match any known event.
    #[error("failed to decode event: {0}")]
    Json(#[from] serde_json::Error),
}

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// DRAWING EVENTS
// =============================================================================

/// The kind of one atomic canvas mutation.
///
/// Serializes with the colon names; the hyphenated names decode too.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DrawingEventKind {
    /// A free-hand path finished drawing.
    #[serde(rename = "path:created", alias = "path-created")]
    PathCreated,
    /// A non-path shape was added.
    #[serde(rename = "object:added", alias = "object-added")]
    ObjectAdded,
    /// An existing shape was changed.
    #[serde(rename = "object:modified", alias = "object-modified")]
    ObjectModified,
    /// A shape was removed.
    #[serde(rename = "object:removed", alias = "object-removed")]
    ObjectRemoved,
    /// The whole canvas was cleared.
    #[serde(rename = "clear")]
    Clear,
}

impl DrawingEventKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PathCreated => "path:created",
            Self::ObjectAdded => "object:added",
            Self::ObjectModified => "object:modified",
            Self::ObjectRemoved => "object:removed",
            Self::Clear => "clear",
        }
    }

    /// Parse a wire name back into a kind. Hyphenated spellings
    /// (`object-added`) are accepted alongside the canonical ones.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "path:created" | "path-created" => Some(Self::PathCreated),
            "object:added" | "object-added" => Some(Self::ObjectAdded),
            "object:modified" | "object-modified" => Some(Self::ObjectModified),
            "object:removed" | "object-removed" => Some(Self::ObjectRemoved),
            "clear" => Some(Self::Clear),
            _ => None,
        }
    }
}

/// Payload of create/add/modify events: a full descriptor plus its identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapePayload {
    pub object: Value,
    pub object_id: ShapeId,
}

/// Payload of remove events: identity only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeRef {
    pub object_id: ShapeId,
}

/// Typed view of a drawing event's payload.
#[derive(Clone, Debug, PartialEq)]
pub enum DrawingAction {
    PathCreated(ShapePayload),
    ObjectAdded(ShapePayload),
    ObjectModified(ShapePayload),
    ObjectRemoved(ShapeRef),
    Clear,
}

/// A drawing event as sent by the originating client: `{type, data}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrawingEvent {
    #[serde(rename = "type")]
    pub kind: DrawingEventKind,
    #[serde(default)]
    pub data: Value,
}

impl DrawingEvent {
    /// Build an event from a typed action.
    #[must_use]
    pub fn from_action(action: &DrawingAction) -> Self {
        let (kind, data) = match action {
            DrawingAction::PathCreated(p) => (DrawingEventKind::PathCreated, shape_payload_value(p)),
            DrawingAction::ObjectAdded(p) => (DrawingEventKind::ObjectAdded, shape_payload_value(p)),
            DrawingAction::ObjectModified(p) => (DrawingEventKind::ObjectModified, shape_payload_value(p)),
            DrawingAction::ObjectRemoved(r) => (
                DrawingEventKind::ObjectRemoved,
                serde_json::json!({ "objectId": r.object_id }),
            ),
            DrawingAction::Clear => (DrawingEventKind::Clear, serde_json::json!({})),
        };
        Self { kind, data }
    }

    /// Decode the payload according to the event kind.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] when `data` does not have the shape the
    /// kind requires (for example an `object:added` without `objectId`).
    pub fn action(&self) -> Result<DrawingAction, CodecError> {
        let action = match self.kind {
            DrawingEventKind::PathCreated => DrawingAction::PathCreated(serde_json::from_value(self.data.clone())?),
            DrawingEventKind::ObjectAdded => DrawingAction::ObjectAdded(serde_json::from_value(self.data.clone())?),
            DrawingEventKind::ObjectModified => {
                DrawingAction::ObjectModified(serde_json::from_value(self.data.clone())?)
            }
            DrawingEventKind::ObjectRemoved => {
                DrawingAction::ObjectRemoved(serde_json::from_value(self.data.clone())?)
            }
            DrawingEventKind::Clear => DrawingAction::Clear,
        };
        Ok(action)
    }
}

fn shape_payload_value(payload: &ShapePayload) -> Value {
    serde_json::json!({ "object": payload.object, "objectId": payload.object_id })
}

/// A drawing event stamped by the relay with its origin and server time.
///
/// This is both the outbound `drawing-event` payload and one entry of a
/// room's durable event log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawingRecord {
    #[serde(rename = "type")]
    pub kind: DrawingEventKind,
    #[serde(default)]
    pub data: Value,
    pub user_id: String,
    pub username: String,
    /// Milliseconds since Unix epoch, assigned by the server.
    pub timestamp: i64,
}

impl DrawingRecord {
    #[must_use]
    pub fn stamp(event: DrawingEvent, user_id: &str, username: &str, timestamp: i64) -> Self {
        Self {
            kind: event.kind,
            data: event.data,
            user_id: user_id.to_owned(),
            username: username.to_owned(),
            timestamp,
        }
    }

    /// The unstamped event, as the originating client sent it.
    #[must_use]
    pub fn event(&self) -> DrawingEvent {
        DrawingEvent { kind: self.kind, data: self.data.clone() }
    }
}

// =============================================================================
// INBOUND
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_id: RoomId,
    pub user_id: String,
    pub username: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTyping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub is_typing: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveCanvas {
    pub canvas_data: Value,
}

/// Every event a client may send.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom(JoinRoom),
    LeaveRoom(Empty),
    DrawingEvent(DrawingEvent),
    ClearCanvas(Empty),
    ChatMessage(ChatMessage),
    UserTyping(UserTyping),
    SaveCanvas(SaveCanvas),
}

impl ClientEvent {
    /// Wire name, used for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => "join-room",
            Self::LeaveRoom(_) => "leave-room",
            Self::DrawingEvent(_) => "drawing-event",
            Self::ClearCanvas(_) => "clear-canvas",
            Self::ChatMessage(_) => "chat-message",
            Self::UserTyping(_) => "user-typing",
            Self::SaveCanvas(_) => "save-canvas",
        }
    }
}

// =============================================================================
// OUTBOUND
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub session_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoined {
    pub room_id: RoomId,
    pub user_count: usize,
}

/// Join/leave notification sent to the rest of the room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    pub user_id: String,
    pub username: String,
    pub user_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub user_id: String,
    pub username: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBroadcast {
    pub user_id: String,
    pub username: String,
    pub message: String,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingBroadcast {
    pub user_id: String,
    pub username: String,
    pub is_typing: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSaved {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
}

/// Every event the server may send.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Connected(Connected),
    RoomJoined(RoomJoined),
    UserJoined(PresenceNotice),
    UserLeft(PresenceNotice),
    DrawingEvent(DrawingRecord),
    CanvasCleared(Author),
    ChatMessage(ChatBroadcast),
    UserTyping(TypingBroadcast),
    CanvasSaved(CanvasSaved),
    Error(ErrorNotice),
}

impl ServerEvent {
    /// Wire name, used for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::RoomJoined(_) => "room-joined",
            Self::UserJoined(_) => "user-joined",
            Self::UserLeft(_) => "user-left",
            Self::DrawingEvent(_) => "drawing-event",
            Self::CanvasCleared(_) => "canvas-cleared",
            Self::ChatMessage(_) => "chat-message",
            Self::UserTyping(_) => "user-typing",
            Self::CanvasSaved(_) => "canvas-saved",
            Self::Error(_) => "error",
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorNotice { message: message.into() })
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Encode a client event as a JSON text message.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if a payload value cannot be serialized.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Decode a client event from a JSON text message.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed JSON or unknown events.
pub fn decode_client(text: &str) -> Result<ClientEvent, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode a server event as a JSON text message.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if a payload value cannot be serialized.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Decode a server event from a JSON text message.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed JSON or unknown events.
pub fn decode_server(text: &str) -> Result<ServerEvent, CodecError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
