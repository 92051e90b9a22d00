//! Fanout - WebSocket Fan-out Hub
//!
//! Keeps a registry of live WebSocket connections and delivers messages to
//! them, locally or across processes over a pub/sub message bus.
//!
//! ## Features
//!
//! - Per-process connection registry with unique ids
//! - Targeted delivery to a connection on any node
//! - Cluster-wide broadcast through a shared bus channel
//! - Redis pub/sub or in-process bus backends
//! - REST routes for diagnostics and server-side dispatch

pub mod api;
pub mod bus;
pub mod config;
pub mod error;
pub mod hub;
pub mod models;

pub use config::Config;
pub use error::{FanoutError, Result};
pub use hub::Hub;
