//! Broadcast and raw publish endpoints

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::api::server::AppState;
use crate::error::FanoutError;
use crate::hub::BroadcastOutcome;

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastScope {
    /// Connections on this node only
    Local,
    /// Every node through the broadcast channel
    #[default]
    Cluster,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub message: String,
    #[serde(default)]
    pub scope: BroadcastScope,
}

pub async fn broadcast(
    State(state): State<AppState>,
    Json(req): Json<BroadcastRequest>,
) -> impl IntoResponse {
    let outcome = match req.scope {
        BroadcastScope::Local => BroadcastOutcome::LocalOnly {
            delivered: state.hub.broadcast(&req.message),
        },
        BroadcastScope::Cluster => state.hub.broadcast_cluster(&req.message).await,
    };
    Json(outcome)
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub channel: String,
    pub message: String,
}

/// Publish on an arbitrary bus channel
pub async fn publish(
    State(state): State<AppState>,
    Json(req): Json<PublishRequest>,
) -> Result<impl IntoResponse, FanoutError> {
    if req.channel.trim().is_empty() {
        return Err(FanoutError::InvalidRequest("channel must not be empty".into()));
    }
    let receivers = state.hub.publish(&req.channel, &req.message).await?;
    Ok(Json(json!({ "channel": req.channel, "receivers": receivers })))
}
