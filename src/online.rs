//! Connectivity state consulted by the retry engine.

use std::sync::Arc;

use tokio::sync::watch;

/// Shared online/offline flag.
///
/// Starts online. Fetches paused by [`crate::NetworkMode::Online`] wait on
/// this flag and continue as soon as it flips back.
#[derive(Clone, Debug)]
pub struct OnlineManager {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for OnlineManager {
    fn default() -> Self {
        Self::new(true)
    }
}

impl OnlineManager {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Set the flag. Returns `true` if the value changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Completes once the flag reads online.
    pub async fn wait_online(&self) {
        let mut rx = self.subscribe();
        // The sender lives in `self`, so `wait_for` only fails if it is dropped.
        let _ = rx.wait_for(|online| *online).await;
    }
}
