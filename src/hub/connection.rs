use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use super::signal::CloseSignal;
use crate::models::{AtomicConnectionState, ConnectionId, ConnectionInfo, ConnectionState};

/// Outcome of handing a frame to a connection's writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Outbound buffer full, frame dropped
    Dropped,
    /// Writer already gone
    Closed,
}

/// Registry entry for one live connection.
///
/// Frames are never written to the socket directly: they go through a bounded
/// queue drained by the connection's writer task.
pub struct ConnectionHandle {
    id: ConnectionId,
    connected_at: DateTime<Utc>,
    state: AtomicConnectionState,
    outbound: mpsc::Sender<String>,
    close: CloseSignal,
    finished: CloseSignal,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<String>) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
            state: AtomicConnectionState::new(ConnectionState::Connecting),
            outbound,
            close: CloseSignal::new(),
            finished: CloseSignal::new(),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub(crate) fn advance(&self, next: ConnectionState) -> bool {
        self.state.advance(next).is_some()
    }

    /// Queue a frame for the client without waiting
    pub fn deliver(&self, text: String) -> Delivery {
        if self.state() >= ConnectionState::Closing {
            return Delivery::Closed;
        }
        match self.outbound.try_send(text) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(id = %self.id, "Outbound buffer full, dropping frame");
                Delivery::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    pub(crate) fn close_signal(&self) -> &CloseSignal {
        &self.close
    }

    /// Ask every task of this connection to stop
    pub fn request_close(&self) {
        self.close.trigger();
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.trigger();
    }

    /// Wait until teardown has fully completed
    pub async fn wait_closed(&self) {
        self.finished.watch().triggered().await;
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            state: self.state(),
            connected_at: self.connected_at,
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
