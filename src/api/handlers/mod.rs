//! API request handlers

pub mod broadcast;
pub mod connections;
pub mod health;
