//! Cancellation signal.
//!
//! One token is created by the orchestrator and threaded explicitly into
//! the collection loop and the analyzer connection. Cancelling is
//! idempotent and observable from every clone.

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable cancellation token.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Signal cancellation. Safe to call more than once.
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once cancellation is signalled. Pending forever if it never
    /// is — always used inside `tokio::select!`.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        if *receiver.borrow() {
            return;
        }
        while receiver.changed().await.is_ok() {
            if *receiver.borrow() {
                return;
            }
        }
        // The sender is owned by this token, so the channel cannot close
        // while we are awaiting; park forever as a fallback.
        std::future::pending::<()>().await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_is_observed_by_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        token.cancel(); // idempotent
        assert!(clone.is_cancelled());
        clone.cancelled().await; // resolves immediately
    }

    #[tokio::test]
    async fn cancelled_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
