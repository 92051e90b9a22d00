//! Live-connection hub
//!
//! Tracks the connections held by this process and fans messages out to
//! them, both locally and, through the message bus, across processes.

mod bridge;
mod connection;
mod dispatch;
mod listener;
mod registry;
mod signal;
pub mod transport;

pub use bridge::Bridge;
pub use connection::{ConnectionHandle, Delivery};
pub use dispatch::{BroadcastOutcome, Hub};
pub use registry::Registry;
pub use signal::{CloseSignal, CloseWatch};
pub use transport::{split_websocket, FrameSink, FrameSource};
