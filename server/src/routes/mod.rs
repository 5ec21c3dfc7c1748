//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router serves the REST room API under `/api/rooms`, the
//! WebSocket endpoint at `/api/ws`, a status document at `/api` and a
//! liveness probe at `/healthz`.

pub mod rooms;
pub mod ws;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::Json;
use axum::routing::get;
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::AppState;

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(state.config.cors_origin.as_deref());

    Router::new()
        .route("/api", get(status))
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/api/rooms/{id}", get(rooms::get_room))
        .route("/api/rooms/{id}/canvas", get(rooms::get_canvas).put(rooms::save_canvas))
        .route("/api/rooms/{id}/events", get(rooms::list_events))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let allow_origin = match origin.map(HeaderValue::from_str) {
        Some(Ok(value)) => AllowOrigin::exact(value),
        Some(Err(e)) => {
            warn!(error = %e, "invalid CORS_ORIGIN; allowing any origin");
            AllowOrigin::from(Any)
        }
        None => AllowOrigin::from(Any),
    };
    CorsLayer::new().allow_origin(allow_origin).allow_methods(Any).allow_headers(Any)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDoc {
    pub name: &'static str,
    pub version: &'static str,
    pub active_rooms: usize,
    pub active_sessions: usize,
}

/// `GET /api`: service name, version and live connection counts.
async fn status(State(state): State<AppState>) -> Json<StatusDoc> {
    let registry = state.presence.read().await;
    Json(StatusDoc {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        active_rooms: registry.room_count(),
        active_sessions: registry.session_count(),
    })
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
