//! API server using Axum
//!
//! Exposes the WebSocket endpoint and the diagnostics/dispatch routes of the hub.

use std::net::SocketAddr;
use std::time::Instant;

use axum::middleware;
use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::{ApiServerConfig, Config};
use crate::error::{FanoutError, Result};
use crate::hub::Hub;

use super::middleware::{cors_layer, RequestLogging};
use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub config: Config,
    pub started_at: Instant,
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(full_config: Config, hub: Hub) -> Self {
        let state = AppState {
            hub,
            config: full_config.clone(),
            started_at: Instant::now(),
        };

        Self {
            config: full_config.api,
            state,
        }
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        let cors = cors_layer(&self.config.cors_origins);

        routes::create_router(self.state.clone())
            .layer(middleware::from_fn(RequestLogging::log_request))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server until `shutdown` flips to true
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| FanoutError::InvalidConfig(format!("Invalid API address: {}", e)))?;

        let router = self.build_router();

        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .map_err(|e| FanoutError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}
