//! Publish/subscribe message bus
//!
//! The hub talks to other server processes exclusively through this trait.
//! `RedisBus` is the production backend; `MemoryBus` keeps everything inside
//! one process and is what a single node (or a test) runs against.

mod memory;
mod redis_pubsub;

pub use memory::MemoryBus;
pub use redis_pubsub::RedisBus;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::{BusBackend, BusConfig};
use crate::error::Result;

/// Messages buffered per subscription before the forwarder waits on the consumer
pub const SUBSCRIPTION_BUFFER_SIZE: usize = 1024;

/// Prefix of the channel each connection listens on for targeted messages
pub const CONNECTION_CHANNEL_PREFIX: &str = "conn:";

/// Prefix of the channel each node listens on besides the broadcast channel
pub const NODE_CHANNEL_PREFIX: &str = "node:";

/// Whether `channel` lies in a namespace the hub assigns itself
pub fn is_reserved_channel(channel: &str) -> bool {
    channel.starts_with(CONNECTION_CHANNEL_PREFIX) || channel.starts_with(NODE_CHANNEL_PREFIX)
}

/// A publish/subscribe primitive shared by every node
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `channel`, returning how many subscribers received it
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize>;

    /// Open a subscription delivering every message published to any of `channels`
    async fn subscribe(&self, channels: &[String]) -> Result<Subscription>;

    /// Round-trip check against the bus
    async fn ping(&self) -> Result<()>;

    /// Backend name for diagnostics
    fn backend_name(&self) -> &'static str;
}

/// Build the bus selected by configuration
pub async fn connect(config: &BusConfig) -> Result<Arc<dyn MessageBus>> {
    match config.backend {
        BusBackend::Redis => Ok(Arc::new(RedisBus::connect(config).await?)),
        BusBackend::Memory => Ok(Arc::new(MemoryBus::new())),
    }
}

/// Receiving end of a bus subscription.
///
/// A backend-specific forwarder task feeds the channel; releasing the
/// subscription stops that task, which then frees the bus-side resources.
pub struct Subscription {
    channels: Vec<String>,
    rx: mpsc::Receiver<String>,
    stop: Option<oneshot::Sender<()>>,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(
        channels: Vec<String>,
        rx: mpsc::Receiver<String>,
        stop: oneshot::Sender<()>,
        forwarder: JoinHandle<()>,
    ) -> Self {
        Self {
            channels,
            rx,
            stop: Some(stop),
            forwarder: Some(forwarder),
        }
    }

    /// Wait for the next message. Returns `None` once the subscription is closed.
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Release the subscription and wait for the bus side to let go of it
    pub async fn unsubscribe(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.rx.close();
        if let Some(forwarder) = self.forwarder.take() {
            if let Err(e) = forwarder.await {
                debug!("Subscription forwarder ended abnormally: {}", e);
            }
        }
        debug!(channels = ?self.channels, "Unsubscribed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channels", &self.channels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_memory_backend() {
        let config = BusConfig {
            backend: BusBackend::Memory,
            ..BusConfig::default()
        };
        let bus = connect(&config).await.unwrap();
        assert_eq!(bus.backend_name(), "memory");
        assert!(bus.ping().await.is_ok());
    }
}
