//! Connection listing and per-connection dispatch

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::api::server::AppState;
use crate::error::FanoutError;
use crate::models::ConnectionId;

/// Ids of the connections held by this node
pub async fn list_connections(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "node_id": state.hub.node_id(),
        "connections": state.hub.list_active(),
    }))
}

/// Id, state and connect time of every local connection
pub async fn connection_details(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.connections())
}

/// Id, state and connect time of one local connection
pub async fn connection_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, FanoutError> {
    let info = state.hub.connection(&ConnectionId::from(id))?;
    Ok(Json(info))
}

/// Disconnect a connection; unknown ids succeed too
pub async fn disconnect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.hub.disconnect(&ConnectionId::from(id)).await;
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
}

/// Send a message to one connection on any node
pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, FanoutError> {
    let id = ConnectionId::from(id);
    debug!(to = %id, "Sending message via API");
    state.hub.send_to(&id, &req.message).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "delivered_to": id }))))
}
