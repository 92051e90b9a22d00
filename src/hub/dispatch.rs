//! Broadcast/dispatch API
//!
//! `Hub` is what the rest of the service talks to: it accepts transports,
//! routes client frames, and fans messages out locally and across nodes.

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::bridge::{Bridge, RESUBSCRIBE_DELAY};
use super::connection::{ConnectionHandle, Delivery};
use super::listener;
use super::registry::Registry;
use super::signal::CloseSignal;
use super::transport::{FrameSink, FrameSource};
use crate::bus::{MessageBus, Subscription};
use crate::config::{HubConfig, UnknownRecipientPolicy};
use crate::error::{FanoutError, Result};
use crate::models::{ConnectionId, ConnectionInfo, ConnectionState, NodeId, Notice, Payload};

/// How a cluster-wide broadcast was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum BroadcastOutcome {
    /// Published on the bus; `receivers` counts subscribed nodes and connections
    Bus { receivers: usize },
    /// Bus unavailable, delivered to local connections only
    LocalOnly { delivered: usize },
}

struct HubInner {
    registry: Registry<ConnectionHandle>,
    bridge: Bridge,
    config: HubConfig,
    shutdown: CloseSignal,
    node_task: Mutex<Option<JoinHandle<()>>>,
}

/// Connection hub for one node. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Create a hub with a freshly generated node identity
    pub fn new(bus: Arc<dyn MessageBus>, config: HubConfig) -> Self {
        let bridge = Bridge::new(bus, NodeId::generate(), config.broadcast_channel.clone());
        Self {
            inner: Arc::new(HubInner {
                registry: Registry::new(),
                bridge,
                config,
                shutdown: CloseSignal::new(),
                node_task: Mutex::new(None),
            }),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        self.inner.bridge.node_id()
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub(crate) fn registry(&self) -> &Registry<ConnectionHandle> {
        &self.inner.registry
    }

    pub(crate) fn bridge(&self) -> &Bridge {
        &self.inner.bridge
    }

    /// Open the node-wide subscription and start delivering bus traffic locally.
    ///
    /// If the bus cannot be reached the error is returned, but the hub keeps
    /// retrying in the background and works local-only meanwhile.
    #[instrument(skip(self), fields(node_id = %self.node_id()))]
    pub async fn start(&self) -> Result<()> {
        let previous = self.inner.node_task.lock().take();
        if let Some(previous) = previous {
            previous.abort();
        }

        let first = self
            .inner
            .bridge
            .subscribe(&self.inner.bridge.node_channels())
            .await;
        let (initial, result) = match first {
            Ok(subscription) => (Some(subscription), Ok(())),
            Err(e) => (None, Err(e)),
        };

        let hub = self.clone();
        *self.inner.node_task.lock() = Some(tokio::spawn(async move {
            hub.node_loop(initial).await;
        }));

        info!(
            "Hub started on channel '{}' ({} bus)",
            self.inner.bridge.broadcast_channel(),
            self.inner.bridge.backend_name()
        );
        result
    }

    async fn node_loop(self, initial: Option<Subscription>) {
        let mut stopped = self.inner.shutdown.watch();
        let mut pending = initial;

        loop {
            let mut subscription = match pending.take() {
                Some(subscription) => subscription,
                None => {
                    tokio::select! {
                        _ = stopped.triggered() => return,
                        _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
                    }
                    match self
                        .inner
                        .bridge
                        .subscribe(&self.inner.bridge.node_channels())
                        .await
                    {
                        Ok(subscription) => {
                            info!("Node subscription established");
                            subscription
                        }
                        Err(e) => {
                            warn!("Node subscription failed, retrying: {}", e);
                            continue;
                        }
                    }
                }
            };

            loop {
                let msg = tokio::select! {
                    _ = stopped.triggered() => None,
                    msg = self.inner.bridge.receive(&mut subscription) => Some(msg),
                };

                match msg {
                    None => {
                        self.inner.bridge.unsubscribe(subscription).await;
                        return;
                    }
                    Some(Some(text)) => {
                        self.broadcast(&text);
                    }
                    Some(None) => {
                        warn!("Node subscription closed by the bus, resubscribing");
                        break;
                    }
                }
            }
        }
    }

    /// Accept a transport under a freshly generated id
    pub async fn connect<S, R>(&self, sink: S, source: R) -> Result<ConnectionId>
    where
        S: FrameSink,
        R: FrameSource,
    {
        self.connect_with_id(ConnectionId::generate(), sink, source)
            .await
    }

    /// Accept a transport under a caller-chosen id; fails if the id is live
    #[instrument(skip(self, sink, source), fields(id = %id))]
    pub async fn connect_with_id<S, R>(
        &self,
        id: ConnectionId,
        sink: S,
        source: R,
    ) -> Result<ConnectionId>
    where
        S: FrameSink,
        R: FrameSource,
    {
        if self.inner.shutdown.is_triggered() {
            return Err(FanoutError::Internal("hub is shutting down".into()));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(self.inner.config.outbound_buffer);
        let handle = Arc::new(ConnectionHandle::new(id.clone(), outbound_tx));
        self.inner.registry.register(id.clone(), handle.clone())?;

        // Own channel, so targeted messages published on any node reach us
        let channel = self.inner.bridge.connection_channel(&id);
        let subscription = match self.inner.bridge.subscribe(&[channel]).await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!("Connection subscription unavailable, local delivery only: {}", e);
                None
            }
        };

        handle.advance(ConnectionState::Open);
        info!("Connection opened ({} active)", self.inner.registry.len());

        // The departure notice comes from the supervisor, so arrival must be out first
        self.announce(Notice::Joined(id.clone())).await;

        tokio::spawn(listener::supervise(
            self.clone(),
            handle,
            sink,
            source,
            outbound_rx,
            subscription,
        ));
        Ok(id)
    }

    /// Close a connection and wait for its teardown. Unknown ids are a no-op.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn disconnect(&self, id: &ConnectionId) {
        let Some(handle) = self.inner.registry.lookup(id) else {
            debug!("Disconnect for unknown connection ignored");
            return;
        };
        handle.request_close();
        handle.wait_closed().await;
    }

    /// Deliver `message` to one connection, wherever it lives
    pub async fn send_to(&self, id: &ConnectionId, message: &str) -> Result<()> {
        if let Some(handle) = self.inner.registry.lookup(id) {
            if handle.deliver(message.to_string()) != Delivery::Closed {
                return Ok(());
            }
        }

        let channel = self.inner.bridge.connection_channel(id);
        let receivers = self.inner.bridge.publish(&channel, message).await?;
        if receivers > 0 {
            return Ok(());
        }

        match self.inner.config.unknown_recipient {
            UnknownRecipientPolicy::Error => Err(FanoutError::RecipientNotFound {
                id: id.to_string(),
            }),
            UnknownRecipientPolicy::Drop => {
                debug!(id = %id, "Dropping message for unknown recipient");
                Ok(())
            }
        }
    }

    /// Deliver `message` to every connection held by this node. Returns how many accepted it.
    pub fn broadcast(&self, message: &str) -> usize {
        self.inner
            .registry
            .snapshot()
            .iter()
            .filter(|handle| handle.deliver(message.to_string()) == Delivery::Queued)
            .count()
    }

    /// Deliver `message` to every connection on every node via the broadcast channel,
    /// falling back to local delivery when the bus is down
    pub async fn broadcast_cluster(&self, message: &str) -> BroadcastOutcome {
        let channel = self.inner.bridge.broadcast_channel();
        match self.inner.bridge.publish(channel, message).await {
            Ok(receivers) => BroadcastOutcome::Bus { receivers },
            Err(e) => {
                warn!("Falling back to local broadcast: {}", e);
                BroadcastOutcome::LocalOnly {
                    delivered: self.broadcast(message),
                }
            }
        }
    }

    /// Publish raw `payload` on an arbitrary bus channel
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        self.inner.bridge.publish(channel, payload).await
    }

    pub(crate) async fn announce(&self, notice: Notice) {
        let text = notice.render();
        self.broadcast_cluster(&text).await;
    }

    /// Route one client frame
    pub(crate) async fn handle_frame(&self, from: &ConnectionId, text: String) {
        match Payload::from_frame(&text) {
            Payload::Structured { target, body } => {
                match self.send_to(&target, &body).await {
                    Ok(()) => {}
                    Err(FanoutError::RecipientNotFound { .. }) => {
                        self.reply(from, Notice::RecipientNotFound(target).render());
                    }
                    Err(e) => {
                        warn!(from = %from, to = %target, "Targeted delivery failed: {}", e);
                        self.reply(from, format!("Delivery to {} failed", target));
                    }
                }
            }
            Payload::Plain(body) => {
                self.broadcast_cluster(&body).await;
            }
        }
    }

    fn reply(&self, to: &ConnectionId, text: String) {
        if let Some(handle) = self.inner.registry.lookup(to) {
            handle.deliver(text);
        }
    }

    /// Ids of connections held by this node, oldest first
    pub fn list_active(&self) -> Vec<ConnectionId> {
        self.inner.registry.list_ids()
    }

    /// Snapshot of one local connection
    pub fn connection(&self, id: &ConnectionId) -> Result<ConnectionInfo> {
        self.inner
            .registry
            .lookup(id)
            .map(|handle| handle.info())
            .ok_or_else(|| FanoutError::NotFound { id: id.to_string() })
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.inner
            .registry
            .snapshot()
            .iter()
            .map(|handle| handle.info())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub async fn bus_health(&self) -> Result<()> {
        self.inner.bridge.ping().await
    }

    pub fn bus_backend(&self) -> &'static str {
        self.inner.bridge.backend_name()
    }

    /// Close every connection and stop the node subscription
    #[instrument(skip(self), fields(node_id = %self.node_id()))]
    pub async fn shutdown(&self) {
        self.inner.shutdown.trigger();

        let ids = self.list_active();
        info!("Closing {} connections", ids.len());
        join_all(ids.iter().map(|id| self.disconnect(id))).await;

        let task = self.inner.node_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Node subscription task ended abnormally: {}", e);
            }
        }

        info!("Hub stopped");
    }
}
