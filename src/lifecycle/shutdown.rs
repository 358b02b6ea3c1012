//! Shutdown coordination for the process.

use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

/// Registered services did not report completion before the deadline.
#[derive(Debug, thiserror::Error)]
#[error("{pending} service(s) still running after {timeout:?}")]
pub struct ShutdownTimeout {
    pub pending: usize,
    pub timeout: Duration,
}

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to,
/// and collects the completion signals of registered services.
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
    /// Completion receivers of registered services.
    done: std::sync::Mutex<Vec<oneshot::Receiver<()>>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            done: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Subscribe and get a completion sender the coordinator waits on.
    ///
    /// The pair plugs into `ServerBuilder::with_shutdown_signal`.
    pub fn register(&self) -> (broadcast::Receiver<()>, oneshot::Sender<()>) {
        let (done_tx, done_rx) = oneshot::channel();
        self.done
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(done_rx);
        (self.tx.subscribe(), done_tx)
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Trigger the signal and wait for every registered service to finish.
    ///
    /// A dropped completion sender counts as finished.
    pub async fn trigger_and_wait(&self, timeout: Duration) -> Result<(), ShutdownTimeout> {
        let pending: Vec<_> = std::mem::take(
            &mut *self
                .done
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let total = pending.len();

        self.trigger();
        tracing::info!(services = total, "Shutdown triggered");

        let mut finished = 0;
        let wait_all = async {
            for rx in pending {
                let _ = rx.await;
                finished += 1;
            }
        };
        let outcome = tokio::time::timeout(timeout, wait_all).await;

        match outcome {
            Ok(()) => {
                tracing::info!(services = total, "All services shut down");
                Ok(())
            }
            Err(_) => {
                let pending = total - finished;
                tracing::warn!(pending, timeout = ?timeout, "Shutdown deadline exceeded");
                Err(ShutdownTimeout { pending, timeout })
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
