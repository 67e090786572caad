//! Shutdown signalling for the worker loop.
//!
//! The binary turns SIGINT/SIGTERM into a [`ShutdownSignal`] broadcast; the
//! pipeline's `run` loop checks it between passes.

use tokio::sync::broadcast;

/// Shutdown signal that can be sent to all active loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Finish the current pass, then stop
    Graceful,
}

/// Sender half of the shutdown broadcast.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: broadcast::Sender<ShutdownSignal>,
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownTrigger {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(4);
        Self { tx }
    }

    /// Get a receiver for shutdown signals
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.tx.subscribe()
    }

    /// Request a graceful shutdown of every subscriber.
    pub fn trigger(&self) {
        let _ = self.tx.send(ShutdownSignal::Graceful);
    }
}

/// Resolves when SIGINT or SIGTERM is received.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).ok();
    let mut sigint = signal(SignalKind::interrupt()).ok();

    tokio::select! {
        () = async {
            if let Some(ref mut sig) = sigterm {
                sig.recv().await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {
            tracing::info!("Received SIGTERM, finishing current pass before shutdown");
        }
        () = async {
            if let Some(ref mut sig) = sigint {
                sig.recv().await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {
            tracing::info!("Received SIGINT, finishing current pass before shutdown");
        }
    }
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Received Ctrl+C, finishing current pass before shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_every_subscriber() {
        let trigger = ShutdownTrigger::new();
        let mut first = trigger.subscribe();
        let mut second = trigger.subscribe();

        trigger.trigger();

        assert_eq!(first.recv().await.ok(), Some(ShutdownSignal::Graceful));
        assert_eq!(second.recv().await.ok(), Some(ShutdownSignal::Graceful));
    }

    #[test]
    fn test_trigger_without_subscribers_is_harmless() {
        ShutdownTrigger::new().trigger();
    }
}
