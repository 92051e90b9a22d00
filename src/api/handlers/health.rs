//! Health and status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;
use crate::error::FanoutError;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "fanout"
        })),
    )
}

/// Node status: identity, bus backend, load and uptime
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "node_id": state.hub.node_id(),
        "bus": state.hub.bus_backend(),
        "broadcast_channel": state.hub.config().broadcast_channel,
        "active_connections": state.hub.active_count(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

/// Round-trip against the message bus
pub async fn bus_health(State(state): State<AppState>) -> Result<impl IntoResponse, FanoutError> {
    state.hub.bus_health().await?;
    Ok(Json(true))
}
