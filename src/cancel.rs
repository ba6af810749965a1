use std::sync::Arc;

use tokio::sync::watch;

/// Run-wide cancellation signal. Once cancelled it stays cancelled.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        Self {
            sender: Arc::new(watch::channel(false).0),
        }
    }

    pub fn cancel(&self) {
        if !self.sender.send_replace(true) {
            tracing::debug!("cancellation signalled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn listener(&self) -> CancelListener {
        CancelListener {
            receiver: self.sender.subscribe(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancelListener {
    receiver: watch::Receiver<bool>,
}

impl CancelListener {
    /// Point in time check.
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves with `true` once cancellation is signalled, or `false` if every
    /// handle was dropped without cancelling.
    pub async fn cancelled(&mut self) -> bool {
        self.receiver.wait_for(|cancelled| *cancelled).await.is_ok()
    }
}
