//! Hub WebSocket handler
//!
//! Upgrades the request and hands both socket halves to the hub, which owns
//! the connection from then on.

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use tracing::{debug, warn};

use crate::api::server::AppState;
use crate::hub::{split_websocket, Hub};

/// WebSocket handler for hub clients
pub async fn hub_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| attach(socket, state.hub))
}

async fn attach(socket: WebSocket, hub: Hub) {
    let (sink, source) = split_websocket(socket);
    match hub.connect(sink, source).await {
        Ok(id) => debug!(id = %id, "WebSocket attached to hub"),
        Err(e) => warn!("WebSocket rejected: {}", e),
    }
}
