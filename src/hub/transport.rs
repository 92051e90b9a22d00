//! Frame-level transport seam
//!
//! The hub only needs to read and write text frames; these traits keep it
//! independent of axum's WebSocket type.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tracing::debug;

use crate::error::{FanoutError, Result};

/// Writing half of a client connection
#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send(&mut self, text: String) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Reading half of a client connection
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Next text frame; `None` once the client has gone away
    async fn recv(&mut self) -> Option<Result<String>>;
}

/// Split an upgraded WebSocket into hub transport halves
pub fn split_websocket(socket: WebSocket) -> (WsSink, WsSource) {
    let (sender, receiver) = socket.split();
    (WsSink { sender }, WsSource { receiver })
}

pub struct WsSink {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, text: String) -> Result<()> {
        self.sender
            .send(Message::Text(text))
            .await
            .map_err(FanoutError::from)
    }

    async fn close(&mut self) -> Result<()> {
        // Close frame first; the peer may already be gone
        let _ = self.sender.send(Message::Close(None)).await;
        self.sender.close().await.map_err(FanoutError::from)
    }
}

pub struct WsSource {
    receiver: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn recv(&mut self) -> Option<Result<String>> {
        while let Some(msg) = self.receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!("Skipping non UTF-8 binary frame"),
                },
                Ok(Message::Close(_)) => {
                    debug!("WebSocket received close");
                    return None;
                }
                // Pong is handled automatically by axum
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Err(e) => return Some(Err(FanoutError::from(e))),
            }
        }
        None
    }
}
