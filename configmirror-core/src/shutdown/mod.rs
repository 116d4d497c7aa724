//! Graceful shutdown coordinator
//!
//! One broadcast signal fans out to the supervisor loop and the telemetry
//! reporter. There is no hard timeout: components stop cooperatively and the
//! agent calls `mark_complete` once the channel has closed.
//!
//! A graceful shutdown still applies hub events that were already queued.
//! An immediate one (second Ctrl+C or SIGTERM) discards them.

use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

/// Shutdown signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Graceful,
    Immediate,
}

/// Shutdown state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Shutdown,
}

/// Graceful shutdown coordinator
pub struct ShutdownCoordinator {
    state: Arc<RwLock<ShutdownState>>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            state: Arc::new(RwLock::new(ShutdownState::Running)),
            shutdown_tx,
        }
    }

    /// Subscribe to shutdown notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Ask every component to stop. Idempotent.
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        if *state != ShutdownState::Running {
            warn!("Shutdown already in progress");
            return;
        }

        info!("Initiating graceful shutdown");
        *state = ShutdownState::ShuttingDown;
        drop(state);

        if self.shutdown_tx.send(ShutdownSignal::Graceful).is_err() {
            // Nothing subscribed; components started later check the state.
            warn!("No components listening for shutdown");
        }
    }

    /// Stop without applying queued hub events. Allowed while a graceful
    /// shutdown is already running.
    pub async fn shutdown_immediately(&self) {
        warn!("Initiating immediate shutdown");

        let mut state = self.state.write().await;
        *state = ShutdownState::Shutdown;
        drop(state);

        if let Err(e) = self.shutdown_tx.send(ShutdownSignal::Immediate) {
            error!("Failed to send immediate shutdown signal: {}", e);
        }
    }

    /// Record that every component has stopped
    pub async fn mark_complete(&self) {
        let mut state = self.state.write().await;
        *state = ShutdownState::Shutdown;
        info!("Shutdown complete");
    }

    /// Check if shutdown is in progress
    pub async fn is_shutting_down(&self) -> bool {
        let state = self.state.read().await;
        *state == ShutdownState::ShuttingDown || *state == ShutdownState::Shutdown
    }

    /// Get current state
    pub async fn state(&self) -> ShutdownState {
        *self.state.read().await
    }

    /// Resolves once shutdown has been requested, even if that happened earlier
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.subscribe();
        if self.is_shutting_down().await {
            return;
        }
        let _ = rx.recv().await;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// First signal while running starts a graceful shutdown, any later one
/// an immediate shutdown
pub async fn escalate(coordinator: &ShutdownCoordinator) {
    if coordinator.is_shutting_down().await {
        coordinator.shutdown_immediately().await;
    } else {
        coordinator.shutdown().await;
    }
}

/// Install signal handlers for graceful shutdown
#[cfg(unix)]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                return;
            }
        };

        while coordinator.state().await != ShutdownState::Shutdown {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => info!("Received Ctrl+C"),
                    Err(e) => {
                        error!("Failed to listen for Ctrl+C: {}", e);
                        return;
                    }
                },
            }
            escalate(&coordinator).await;
        }
    });
}

/// Install signal handlers for graceful shutdown (Windows)
#[cfg(windows)]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) {
    tokio::spawn(async move {
        while coordinator.state().await != ShutdownState::Shutdown {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C"),
                Err(e) => {
                    error!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
            }
            escalate(&coordinator).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_coordinator() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.state().await, ShutdownState::Running);

        let mut rx = coordinator.subscribe();
        coordinator.shutdown().await;

        assert_eq!(rx.recv().await.unwrap(), ShutdownSignal::Graceful);
        assert_eq!(coordinator.state().await, ShutdownState::ShuttingDown);

        coordinator.mark_complete().await;
        assert_eq!(coordinator.state().await, ShutdownState::Shutdown);
    }

    #[tokio::test]
    async fn test_second_shutdown_is_ignored() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();

        coordinator.shutdown().await;
        coordinator.shutdown().await;

        assert_eq!(rx.recv().await.unwrap(), ShutdownSignal::Graceful);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wait_after_shutdown_returns() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.shutdown().await;

        tokio::time::timeout(Duration::from_secs(1), coordinator.wait_for_shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_immediate_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();

        coordinator.shutdown_immediately().await;

        assert_eq!(rx.recv().await.unwrap(), ShutdownSignal::Immediate);
        assert!(coordinator.is_shutting_down().await);
    }

    #[tokio::test]
    async fn test_second_signal_escalates() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();

        escalate(&coordinator).await;
        assert_eq!(rx.recv().await.unwrap(), ShutdownSignal::Graceful);
        assert_eq!(coordinator.state().await, ShutdownState::ShuttingDown);

        escalate(&coordinator).await;
        assert_eq!(rx.recv().await.unwrap(), ShutdownSignal::Immediate);
        assert_eq!(coordinator.state().await, ShutdownState::Shutdown);
    }
}
