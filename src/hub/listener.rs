//! Per-connection tasks
//!
//! Every connection runs three tasks under one supervisor:
//! - writer: drains the outbound queue into the socket
//! - bus listener: drains the connection's own subscription into the outbound queue
//! - reader: reads client frames and hands them to the hub
//!
//! A read error, a write error, an explicit disconnect or hub shutdown raises
//! the connection's close signal. The supervisor then tears down in order:
//! mark closing, unregister, wait for all three tasks, unsubscribe, mark
//! closed, announce the departure.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use super::bridge::RESUBSCRIBE_DELAY;
use super::connection::{ConnectionHandle, Delivery};
use super::dispatch::Hub;
use super::signal::CloseSignal;
use super::transport::{FrameSink, FrameSource};
use crate::bus::Subscription;
use crate::models::{ConnectionId, ConnectionState, Notice};

/// Supervise one connection from open to fully closed
#[instrument(skip_all, fields(id = %handle.id()))]
pub(crate) async fn supervise<S, R>(
    hub: Hub,
    handle: Arc<ConnectionHandle>,
    sink: S,
    source: R,
    outbound: mpsc::Receiver<String>,
    subscription: Option<Subscription>,
) where
    S: FrameSink,
    R: FrameSource,
{
    let id = handle.id().clone();
    let close = handle.close_signal().clone();

    let writer = tokio::spawn(write_loop(sink, outbound, close.clone()));
    let listener = tokio::spawn(listen_loop(hub.clone(), subscription, handle.clone()));
    let reader = tokio::spawn(read_loop(hub.clone(), id.clone(), source, close.clone()));

    close.watch().triggered().await;

    handle.advance(ConnectionState::Closing);
    hub.registry().unregister(&id);

    let (reader, writer, listener) = tokio::join!(reader, writer, listener);
    if let Err(e) = reader {
        error!("Reader task failed: {}", e);
    }
    if let Err(e) = writer {
        error!("Writer task failed: {}", e);
    }
    match listener {
        Ok(Some(subscription)) => hub.bridge().unsubscribe(subscription).await,
        Ok(None) => {}
        Err(e) => error!("Bus listener task failed: {}", e),
    }

    handle.advance(ConnectionState::Closed);
    info!("Connection closed");

    hub.announce(Notice::Left(id)).await;
    handle.mark_finished();
}

/// Outbound queue -> socket
async fn write_loop<S: FrameSink>(
    mut sink: S,
    mut outbound: mpsc::Receiver<String>,
    close: CloseSignal,
) {
    let mut closed = close.watch();

    loop {
        let frame = tokio::select! {
            _ = closed.triggered() => None,
            frame = outbound.recv() => frame,
        };
        let Some(text) = frame else { break };

        if let Err(e) = sink.send(text).await {
            warn!("Write failed, closing connection: {}", e);
            break;
        }
    }

    close.trigger();
    if let Err(e) = sink.close().await {
        debug!("Socket close failed: {}", e);
    }
}

/// Connection's own bus subscription -> outbound queue.
///
/// Ends with the connection. While the bus refuses or drops the subscription
/// the connection keeps local delivery and the subscription is retried.
async fn listen_loop(
    hub: Hub,
    subscription: Option<Subscription>,
    handle: Arc<ConnectionHandle>,
) -> Option<Subscription> {
    let mut closed = handle.close_signal().watch();
    let channel = hub.bridge().connection_channel(handle.id());
    let mut current = subscription;

    loop {
        let Some(subscription) = current.as_mut() else {
            tokio::select! {
                _ = closed.triggered() => return None,
                _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
            }
            match hub.bridge().subscribe(std::slice::from_ref(&channel)).await {
                Ok(subscription) => {
                    info!("Connection subscription re-established");
                    current = Some(subscription);
                }
                Err(e) => debug!("Connection subscription still unavailable: {}", e),
            }
            continue;
        };

        let msg = tokio::select! {
            _ = closed.triggered() => None,
            msg = hub.bridge().receive(subscription) => Some(msg),
        };

        match msg {
            None => return current,
            Some(Some(text)) => {
                if handle.deliver(text) == Delivery::Closed {
                    return current;
                }
            }
            Some(None) => {
                warn!("Connection subscription closed by the bus, resubscribing");
                if let Some(stale) = current.take() {
                    hub.bridge().unsubscribe(stale).await;
                }
            }
        }
    }
}

/// Socket -> hub
async fn read_loop<R: FrameSource>(hub: Hub, id: ConnectionId, mut source: R, close: CloseSignal) {
    let mut closed = close.watch();

    loop {
        let frame = tokio::select! {
            _ = closed.triggered() => break,
            frame = source.recv() => frame,
        };

        match frame {
            Some(Ok(text)) => hub.handle_frame(&id, text).await,
            Some(Err(e)) => {
                warn!("Read failed, closing connection: {}", e);
                break;
            }
            None => {
                debug!("Client went away");
                break;
            }
        }
    }

    close.trigger();
}
