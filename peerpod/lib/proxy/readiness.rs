use std::sync::Arc;

use tokio::sync::watch;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A one-shot readiness notification.
///
/// Clones share the same flag. It is fulfilled at most once and can be observed either with the
/// non-blocking [`is_ready`](Self::is_ready) or the awaitable [`wait`](Self::wait).
#[derive(Debug, Clone)]
pub struct Readiness {
    tx: Arc<watch::Sender<bool>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Readiness {
    /// Creates an unfulfilled notification.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fulfills the notification. Returns `true` only for the call that fulfilled it.
    pub fn notify(&self) -> bool {
        self.tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    /// Returns whether the notification has been fulfilled.
    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Waits until the notification is fulfilled.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the channel cannot close while waiting.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
