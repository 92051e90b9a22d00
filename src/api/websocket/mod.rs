//! WebSocket handlers

pub mod hub;
