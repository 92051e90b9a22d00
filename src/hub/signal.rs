use std::sync::Arc;

use tokio::sync::watch;

/// One-shot, cloneable stop flag built on a `watch` channel
#[derive(Clone)]
pub struct CloseSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the flag. Later calls are no-ops.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn watch(&self) -> CloseWatch {
        CloseWatch {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`CloseSignal`]
pub struct CloseWatch {
    rx: watch::Receiver<bool>,
}

impl CloseWatch {
    /// Resolve once the flag is raised (immediately if it already is)
    pub async fn triggered(&mut self) {
        loop {
            let raised = *self.rx.borrow_and_update();
            if raised {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
