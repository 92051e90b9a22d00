//! API server implementation
//!
//! Provides the WebSocket endpoint plus REST routes for inspecting the
//! connection registry and dispatching messages.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{ApiServer, AppState};
