//! API route definitions

use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::server::AppState;
use super::websocket;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Liveness
        .route("/health", get(handlers::health::health_check))
        .route("/api/status", get(handlers::health::status))
        .route("/api/health/bus", get(handlers::health::bus_health))
        // Connection registry
        .route("/api/connections", get(handlers::connections::list_connections))
        .route(
            "/api/connections/details",
            get(handlers::connections::connection_details),
        )
        .route(
            "/api/connections/:id",
            get(handlers::connections::connection_detail)
                .delete(handlers::connections::disconnect),
        )
        .route(
            "/api/connections/:id/messages",
            post(handlers::connections::send_message),
        )
        // Fan-out
        .route("/api/broadcast", post(handlers::broadcast::broadcast))
        .route("/api/publish", post(handlers::broadcast::publish))
        // WebSocket endpoint
        .route("/ws", get(websocket::hub::hub_ws))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::bus::MemoryBus;
    use crate::config::{ApiServerConfig, BusBackend, BusConfig, Config, HubConfig, LogConfig};
    use crate::hub::transport::memory::{self, MemoryClient};
    use crate::hub::Hub;
    use crate::models::ConnectionId;

    const WAIT: Duration = Duration::from_secs(2);

    fn test_config() -> Config {
        Config {
            api: ApiServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
                cors_origins: Vec::new(),
            },
            bus: BusConfig {
                backend: BusBackend::Memory,
                ..BusConfig::default()
            },
            hub: HubConfig::default(),
            log: LogConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    async fn setup() -> (Router, Hub, MemoryBus) {
        let bus = MemoryBus::new();
        let config = test_config();
        let hub = Hub::new(Arc::new(bus.clone()), config.hub.clone());
        hub.start().await.unwrap();
        let state = AppState {
            hub: hub.clone(),
            config,
            started_at: Instant::now(),
        };
        (create_router(state), hub, bus)
    }

    async fn attach(hub: &Hub, id: &str) -> MemoryClient {
        let (sink, source, client) = memory::pair();
        hub.connect_with_id(ConnectionId::from(id), sink, source)
            .await
            .unwrap();
        client
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _hub, _bus) = setup().await;
        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_status_reports_node() {
        let (app, hub, _bus) = setup().await;
        let _a = attach(&hub, "a").await;

        let (status, body) = call(&app, Method::GET, "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node_id"], hub.node_id().as_str());
        assert_eq!(body["bus"], "memory");
        assert_eq!(body["broadcast_channel"], "ws");
        assert_eq!(body["active_connections"], 1);
    }

    #[tokio::test]
    async fn test_bus_health_follows_bus() {
        let (app, _hub, bus) = setup().await;

        let (status, body) = call(&app, Method::GET, "/api/health/bus", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(true));

        bus.set_available(false);
        let (status, _) = call(&app, Method::GET, "/api/health/bus", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_list_connections() {
        let (app, hub, _bus) = setup().await;
        let _a = attach(&hub, "a").await;
        let _b = attach(&hub, "b").await;

        let (status, body) = call(&app, Method::GET, "/api/connections", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connections"], json!(["a", "b"]));

        let (status, body) = call(&app, Method::GET, "/api/connections/details", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], "a");
        assert_eq!(body[0]["state"], "open");
    }

    #[tokio::test]
    async fn test_connection_detail_route() {
        let (app, hub, _bus) = setup().await;
        let _a = attach(&hub, "a").await;

        let (status, body) = call(&app, Method::GET, "/api/connections/a", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "a");
        assert_eq!(body["state"], "open");

        let (status, body) = call(&app, Method::GET, "/api/connections/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_disconnect_route() {
        let (app, hub, _bus) = setup().await;
        let a = attach(&hub, "a").await;

        let (status, _) = call(&app, Method::DELETE, "/api/connections/a", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(hub.list_active().is_empty());
        assert!(a.is_closed());

        let (status, _) = call(&app, Method::DELETE, "/api/connections/ghost", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_send_message_route() {
        let (app, hub, _bus) = setup().await;
        let mut a = attach(&hub, "a").await;
        a.drain();

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/connections/a/messages",
            Some(json!({ "message": "from server" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(a.expect("from server", WAIT).await);

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/connections/ghost/messages",
            Some(json!({ "message": "lost" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_broadcast_route() {
        let (app, hub, _bus) = setup().await;
        let mut a = attach(&hub, "a").await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/broadcast",
            Some(json!({ "message": "everyone" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["via"], "bus");
        assert!(a.expect("everyone", WAIT).await);

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/broadcast",
            Some(json!({ "message": "here only", "scope": "local" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["delivered"], 1);
        assert!(a.expect("here only", WAIT).await);
    }

    #[tokio::test]
    async fn test_publish_route() {
        let (app, _hub, bus) = setup().await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/publish",
            Some(json!({ "channel": "audit", "message": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["receivers"], 0);

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/publish",
            Some(json!({ "channel": " ", "message": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        bus.set_available(false);
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/publish",
            Some(json!({ "channel": "audit", "message": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
