//! Request logging middleware

use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{debug, info};

/// Request logging middleware
pub struct RequestLogging;

impl RequestLogging {
    /// Log method, path, status and latency of each request
    ///
    /// Liveness checks are logged at debug so they do not drown the log.
    pub async fn log_request(req: Request<Body>, next: Next) -> Response {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let start = Instant::now();

        debug!(%method, %path, "request started");

        let response = next.run(req).await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let status = response.status().as_u16();

        if path == "/health" {
            debug!(%method, %path, status, elapsed_ms, "request finished");
        } else {
            info!(%method, %path, status, elapsed_ms, "request finished");
        }

        response
    }
}
