//! Cooperative shutdown signaling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::info;

/// Clonable shutdown signal shared by producers, consumers, and background
/// tasks.
///
/// The first `request_shutdown` call flips the flag and wakes every waiter;
/// later calls are no-ops. The flag never resets, so a handle observed as
/// shut down stays shut down. Cheap to clone and safe to trigger from a
/// signal-handler task.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    inner: Arc<ShutdownState>,
}

#[derive(Debug, Default)]
struct ShutdownState {
    requested: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Creates a coordinator with shutdown not yet requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Idempotent; only the first call logs and notifies.
    pub fn request_shutdown(&self) {
        if self.inner.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutdown requested");
        self.inner.notify.notify_waiters();
    }

    /// Returns true once shutdown has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Waits until shutdown is requested. Returns immediately if it already
    /// was.
    pub async fn requested(&self) {
        loop {
            if self.is_requested() {
                return;
            }
            // Register before re-checking so a request between the check and
            // the await cannot be missed.
            let notified = self.inner.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_request_is_idempotent() {
        let shutdown = ShutdownCoordinator::new();
        assert!(!shutdown.is_requested());

        shutdown.request_shutdown();
        shutdown.request_shutdown();
        assert!(shutdown.is_requested());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let shutdown = ShutdownCoordinator::new();
        let handle = shutdown.clone();

        handle.request_shutdown();
        assert!(shutdown.is_requested());
    }

    #[tokio::test]
    async fn test_wait_wakes_on_request() {
        let shutdown = ShutdownCoordinator::new();
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.requested().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.request_shutdown();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_requested() {
        let shutdown = ShutdownCoordinator::new();
        shutdown.request_shutdown();
        tokio::time::timeout(Duration::from_millis(50), shutdown.requested())
            .await
            .expect("should not block");
    }
}
