//! REST room API.
//!
//! Every response body carries `success`. Failures map through [`ApiError`]
//! to `{success:false, error}` with a 400, 404 or 500 status.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use whiteboard_frames::DrawingRecord;

use crate::error::ErrorCode;
use crate::services::store::{NewRoom, PUBLIC_ROOM_LIMIT, RoomRecord, StoreError};
use crate::state::AppState;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("room not found")]
    NotFound,
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound,
            other => {
                error!(code = other.error_code(), error = %other, "rooms: store call failed");
                Self::Internal
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody { success: false, error: self.to_string() };
        (self.status(), Json(body)).into_response()
    }
}

// =============================================================================
// BODIES
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomBody {
    pub name: Option<String>,
    pub is_public: Option<bool>,
    pub created_by: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveCanvasBody {
    pub canvas_data: Option<Value>,
}

/// Public view of a room.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: String,
    pub name: String,
    pub is_public: bool,
    pub created_by: String,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_users_count: Option<usize>,
}

impl RoomView {
    fn with_count(record: RoomRecord) -> Self {
        let count = record.active_users.len();
        Self { active_users_count: Some(count), ..Self::from(record) }
    }
}

impl From<RoomRecord> for RoomView {
    fn from(record: RoomRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            is_public: record.is_public,
            created_by: record.created_by,
            created_at: record.created_at,
            active_users_count: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    pub success: bool,
    pub room: RoomView,
}

#[derive(Debug, Serialize)]
pub struct RoomListResponse {
    pub success: bool,
    pub rooms: Vec<RoomView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasResponse {
    pub success: bool,
    pub canvas_data: Value,
}

#[derive(Debug, Serialize)]
pub struct EventLogResponse {
    pub success: bool,
    pub events: Vec<DrawingRecord>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: &'static str,
}

fn required(field: Option<String>, name: &str) -> Result<String, ApiError> {
    match field.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_owned()),
        _ => Err(ApiError::BadRequest(format!("{name} is required"))),
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `POST /api/rooms`: create a room.
pub async fn create_room(
    State(state): State<AppState>,
    body: Result<Json<CreateRoomBody>, JsonRejection>,
) -> Result<(StatusCode, Json<RoomResponse>), ApiError> {
    let Json(body) = body?;
    let name = required(body.name, "name")?;
    let created_by = required(body.created_by, "createdBy")?;
    let is_public = body.is_public.unwrap_or(true);

    let record = state.store.create_room(NewRoom { name, is_public, created_by }).await?;
    info!(room_id = %record.id, is_public, "rooms: created");
    Ok((StatusCode::CREATED, Json(RoomResponse { success: true, room: record.into() })))
}

/// `GET /api/rooms`: newest public rooms.
pub async fn list_rooms(State(state): State<AppState>) -> Result<Json<RoomListResponse>, ApiError> {
    let records = state.store.list_public_rooms(PUBLIC_ROOM_LIMIT).await?;
    let rooms = records.into_iter().map(RoomView::with_count).collect();
    Ok(Json(RoomListResponse { success: true, rooms }))
}

/// `GET /api/rooms/{id}`
pub async fn get_room(State(state): State<AppState>, Path(room_id): Path<String>) -> Result<Json<RoomResponse>, ApiError> {
    let record = state.store.find_room(&room_id).await?;
    Ok(Json(RoomResponse { success: true, room: RoomView::with_count(record) }))
}

/// `PUT /api/rooms/{id}/canvas`: overwrite the saved snapshot.
pub async fn save_canvas(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    body: Result<Json<SaveCanvasBody>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(body) = body?;
    let Some(canvas_data) = body.canvas_data else {
        return Err(ApiError::BadRequest("canvasData is required".into()));
    };
    let blob = serde_json::to_string(&canvas_data).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    state.store.save_snapshot(&room_id, &blob).await?;
    info!(%room_id, bytes = blob.len(), "rooms: canvas saved");
    Ok(Json(MessageResponse { success: true, message: "Canvas saved successfully" }))
}

/// `GET /api/rooms/{id}/canvas`: the saved snapshot, or null if none.
pub async fn get_canvas(State(state): State<AppState>, Path(room_id): Path<String>) -> Result<Json<CanvasResponse>, ApiError> {
    let record = state.store.find_room(&room_id).await?;
    let canvas_data = match record.canvas_data.as_deref().map(serde_json::from_str::<Value>) {
        Some(Ok(value)) => value,
        Some(Err(e)) => {
            warn!(%room_id, error = %e, "rooms: stored canvas is not valid JSON");
            Value::Null
        }
        None => Value::Null,
    };
    Ok(Json(CanvasResponse { success: true, canvas_data }))
}

/// `GET /api/rooms/{id}/events`: the room's drawing log, oldest first.
pub async fn list_events(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<EventLogResponse>, ApiError> {
    let events = state.store.event_log(&room_id).await?;
    Ok(Json(EventLogResponse { success: true, events }))
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;
