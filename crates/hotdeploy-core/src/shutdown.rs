//! Process-wide shutdown signal shared by the listener, dispatcher and
//! workers.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable one-way latch: once triggered it stays triggered.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Raise the signal. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal has been raised; immediately if it already was.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // Err only if the sender is gone, which also means shutting down.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}
