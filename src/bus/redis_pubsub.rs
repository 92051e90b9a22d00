//! Redis-backed message bus
//!
//! PUBLISH and PING go through a fixed number of pooled multiplexed
//! connections picked round-robin. A slot is dialled on first use and redialled
//! after its connection breaks, so a Redis restart or an outage at boot only
//! costs the calls made while Redis is away. Each subscription gets a dedicated
//! pub/sub connection whose messages are forwarded into the subscription by a
//! background task.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::RedisError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::{MessageBus, Subscription, SUBSCRIPTION_BUFFER_SIZE};
use crate::config::BusConfig;
use crate::error::{FanoutError, Result};

/// Message bus talking to a Redis server
pub struct RedisBus {
    client: redis::Client,
    pool: Vec<Mutex<Option<MultiplexedConnection>>>,
    next: AtomicUsize,
    timeout: Duration,
}

impl RedisBus {
    /// Prepare the pool described by `config` and check the server once.
    ///
    /// Only a malformed URL is an error; an unreachable server is logged and
    /// retried by later calls.
    #[instrument(skip(config), fields(pool_size = config.pool_size))]
    pub async fn connect(config: &BusConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let pool = (0..config.pool_size.max(1))
            .map(|_| Mutex::new(None))
            .collect();

        let bus = Self {
            client,
            pool,
            next: AtomicUsize::new(0),
            timeout: config.timeout(),
        };

        match bus.ping().await {
            Ok(()) => info!("Connected to Redis ({} pool slots)", bus.pool.len()),
            Err(e) => warn!("Redis unreachable, will keep retrying: {}", e),
        }

        Ok(bus)
    }

    /// Run `op` on the next pool slot, dialling it if needed and discarding it
    /// when the connection turns out to be broken
    async fn with_connection<T, F, Fut>(&self, name: &str, op: F) -> Result<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len();

        let cached = self.pool[slot].lock().clone();
        let conn = match cached {
            Some(conn) => conn,
            None => {
                let conn = with_deadline(
                    self.timeout,
                    "connect",
                    self.client.get_multiplexed_tokio_connection(),
                )
                .await?;
                debug!(slot, "Dialled pooled redis connection");
                *self.pool[slot].lock() = Some(conn.clone());
                conn
            }
        };

        match timeout(self.timeout, op(conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if is_broken(&e) {
                    warn!(slot, "Dropping broken redis connection: {}", e);
                    self.pool[slot].lock().take();
                }
                Err(e.into())
            }
            Err(_) => {
                self.pool[slot].lock().take();
                Err(timed_out(name, self.timeout))
            }
        }
    }
}

/// Whether `e` means the connection itself is unusable
fn is_broken(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

fn timed_out(op: &str, deadline: Duration) -> FanoutError {
    FanoutError::BusUnavailable(format!("redis {} timed out after {:?}", op, deadline))
}

/// Bound a Redis operation by `deadline`, folding timeouts into `BusUnavailable`
async fn with_deadline<T, F>(deadline: Duration, op: &str, fut: F) -> Result<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match timeout(deadline, fut).await {
        Ok(result) => result.map_err(FanoutError::from),
        Err(_) => Err(timed_out(op, deadline)),
    }
}

/// Pump messages from a pub/sub connection into a subscription until stopped
async fn forward_messages(
    mut pubsub: PubSub,
    channels: Vec<String>,
    tx: mpsc::Sender<String>,
    mut stop: oneshot::Receiver<()>,
    op_timeout: Duration,
) {
    {
        let mut messages = pubsub.on_message();
        loop {
            let msg = tokio::select! {
                _ = &mut stop => break,
                _ = tx.closed() => break,
                msg = messages.next() => msg,
            };

            let Some(msg) = msg else {
                warn!(channels = ?channels, "Redis pub/sub stream ended");
                break;
            };

            match msg.get_payload::<String>() {
                Ok(payload) => {
                    if tx.send(payload).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        channel = msg.get_channel_name(),
                        "Dropping undecodable bus message: {}", e
                    );
                }
            }
        }
    }

    for channel in &channels {
        if let Err(e) = with_deadline(op_timeout, "unsubscribe", pubsub.unsubscribe(channel)).await
        {
            debug!(channel = %channel, "Unsubscribe failed: {}", e);
        }
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let receivers: usize = self
            .with_connection("publish", |mut conn| async move {
                let receivers: redis::RedisResult<usize> = redis::cmd("PUBLISH")
                    .arg(channel)
                    .arg(payload)
                    .query_async(&mut conn)
                    .await;
                receivers
            })
            .await?;

        debug!(channel, receivers, "Published on redis");
        Ok(receivers)
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription> {
        let mut pubsub =
            with_deadline(self.timeout, "pubsub connect", self.client.get_async_pubsub()).await?;

        for channel in channels {
            with_deadline(self.timeout, "subscribe", pubsub.subscribe(channel)).await?;
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER_SIZE);
        let (stop_tx, stop_rx) = oneshot::channel();
        let forwarder = tokio::spawn(forward_messages(
            pubsub,
            channels.to_vec(),
            tx,
            stop_rx,
            self.timeout,
        ));

        debug!(channels = ?channels, "Subscribed on redis");
        Ok(Subscription::new(channels.to_vec(), rx, stop_tx, forwarder))
    }

    async fn ping(&self) -> Result<()> {
        let pong: String = self
            .with_connection("ping", |mut conn| async move {
                let pong: redis::RedisResult<String> =
                    redis::cmd("PING").query_async(&mut conn).await;
                pong
            })
            .await?;

        if pong == "PONG" {
            Ok(())
        } else {
            Err(FanoutError::BusUnavailable(format!(
                "unexpected PING reply: {}",
                pong
            )))
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
