//! In-process message bus
//!
//! Every channel is a `tokio::sync::broadcast` sender. Subscribers on the same
//! `MemoryBus` instance behave like nodes sharing one Redis server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use super::{MessageBus, Subscription, SUBSCRIPTION_BUFFER_SIZE};
use crate::error::{FanoutError, Result};

/// Capacity of each channel's broadcast ring
const CHANNEL_CAPACITY: usize = 1024;

/// Message bus living entirely inside the current process
#[derive(Clone)]
pub struct MemoryBus {
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
    available: Arc<AtomicBool>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate an outage: while unavailable, every operation fails with `BusUnavailable`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Number of live subscribers on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(FanoutError::BusUnavailable("memory bus is offline".into()))
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

fn channel_stream(rx: broadcast::Receiver<String>, channel: String) -> BoxStream<'static, String> {
    stream::unfold((rx, channel), |(mut rx, channel)| async move {
        loop {
            match rx.recv().await {
                Ok(msg) => return Some((msg, (rx, channel))),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(channel = %channel, "Subscriber lagged, missed {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        self.ensure_available()?;

        let receivers = match self.channels.get(channel) {
            Some(tx) => tx.send(payload.to_string()).unwrap_or(0),
            None => 0,
        };

        if receivers == 0 {
            // Nobody listens any more; forget the channel
            self.channels
                .remove_if(channel, |_, tx| tx.receiver_count() == 0);
        }

        debug!(channel, receivers, "Published on memory bus");
        Ok(receivers)
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription> {
        self.ensure_available()?;

        let streams: Vec<BoxStream<'static, String>> = channels
            .iter()
            .map(|channel| {
                let rx = self
                    .channels
                    .entry(channel.clone())
                    .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                    .subscribe();
                channel_stream(rx, channel.clone())
            })
            .collect();

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER_SIZE);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let forwarder = tokio::spawn(async move {
            let mut merged = stream::select_all(streams);
            loop {
                let next = tokio::select! {
                    _ = &mut stop_rx => None,
                    _ = tx.closed() => None,
                    msg = merged.next() => msg,
                };
                match next {
                    Some(msg) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        });

        Ok(Subscription::new(channels.to_vec(), rx, stop_tx, forwarder))
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_available()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
