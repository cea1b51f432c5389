//! Coordinated two-phase shutdown.
//!
//! Phase one ([`ShutdownState::initiate_shutdown`]) stops the listener, the
//! expiry sweeper and new host links. Phase two
//! ([`ShutdownState::complete_shutdown`]) is signalled once those loops have
//! wound down and the process may exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// Shared shutdown flags, cheap to clone into every background loop.
#[derive(Debug, Clone)]
pub struct ShutdownState {
    /// No new host links are accepted and background loops stop
    shutdown_initiated: Arc<AtomicBool>,
    /// Background loops have stopped
    shutdown_complete: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownState {
    /// Creates a shutdown state with both flags cleared.
    pub fn new() -> Self {
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_complete: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Whether shutdown has been initiated.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Whether every background loop has stopped.
    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Acquire)
    }

    /// Starts shutdown and wakes every loop waiting in [`Self::initiated`].
    pub fn initiate_shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::AcqRel) {
            info!("🛑 Shutdown initiated - no new host links will be accepted");
        }
        self.notify.notify_waiters();
    }

    /// Marks shutdown as complete.
    pub fn complete_shutdown(&self) {
        self.shutdown_complete.store(true, Ordering::Release);
        info!("✅ Directory loops stopped - ready for final cleanup");
    }

    /// Resolves once shutdown has been initiated.
    pub async fn initiated(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_shutdown_initiated() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_initiated_wakes_waiters() {
        let state = ShutdownState::new();
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.initiated().await })
        };
        tokio::task::yield_now().await;

        state.initiate_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(state.is_shutdown_initiated());
        assert!(!state.is_shutdown_complete());
    }

    #[tokio::test]
    async fn test_initiated_returns_immediately_after_shutdown() {
        let state = ShutdownState::new();
        state.initiate_shutdown();
        state.initiated().await;
        state.complete_shutdown();
        assert!(state.is_shutdown_complete());
    }
}
