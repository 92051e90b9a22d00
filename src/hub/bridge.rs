//! Pub/sub bridge
//!
//! Separates "a connection held by this process" from "a message that may
//! come from any process". Local intent goes out through `publish`; whatever
//! arrives on a subscription is delivered to local sockets by the listeners.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::bus::{MessageBus, Subscription, CONNECTION_CHANNEL_PREFIX, NODE_CHANNEL_PREFIX};
use crate::error::Result;
use crate::models::{ConnectionId, NodeId};

/// Pause before retrying a subscription the bus refused or dropped
pub(crate) const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct Bridge {
    bus: Arc<dyn MessageBus>,
    node_id: NodeId,
    broadcast_channel: String,
}

impl Bridge {
    pub fn new(bus: Arc<dyn MessageBus>, node_id: NodeId, broadcast_channel: String) -> Self {
        Self {
            bus,
            node_id,
            broadcast_channel,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn broadcast_channel(&self) -> &str {
        &self.broadcast_channel
    }

    /// Channels the node-wide shared subscription listens on
    pub fn node_channels(&self) -> Vec<String> {
        vec![
            self.broadcast_channel.clone(),
            format!("{}{}", NODE_CHANNEL_PREFIX, self.node_id),
        ]
    }

    /// Channel carrying targeted messages for connection `id`, on whichever node holds it.
    ///
    /// Connection ids are client-controlled, so they live under their own prefix
    /// and can never name the broadcast or a node channel.
    pub fn connection_channel(&self, id: &ConnectionId) -> String {
        format!("{}{}", CONNECTION_CHANNEL_PREFIX, id)
    }

    /// Publish and report how many subscribers, on any node, received it
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        match self.bus.publish(channel, payload).await {
            Ok(receivers) => Ok(receivers),
            Err(e) => {
                warn!(channel, "Bus publish failed: {}", e);
                Err(e)
            }
        }
    }

    pub async fn subscribe(&self, channels: &[String]) -> Result<Subscription> {
        let subscription = self.bus.subscribe(channels).await?;
        debug!(channels = ?channels, "Bridge subscription opened");
        Ok(subscription)
    }

    /// Next message on `subscription`, `None` once it is closed
    pub async fn receive(&self, subscription: &mut Subscription) -> Option<String> {
        subscription.next().await
    }

    /// Release `subscription`; takes it by value so it cannot be released twice
    pub async fn unsubscribe(&self, subscription: Subscription) {
        subscription.unsubscribe().await;
    }

    pub async fn ping(&self) -> Result<()> {
        self.bus.ping().await
    }

    pub fn backend_name(&self) -> &'static str {
        self.bus.backend_name()
    }
}
