use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

/// Grace period for in-flight tasks once shutdown begins.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

/// Graceful shutdown coordinator shared by the daemon and the worker pool.
///
/// On SIGINT/SIGTERM the coordinator flips a watch channel; long-running loops
/// stop intake, in-flight tasks get [`SHUTDOWN_GRACE`] to finish, and the
/// owning binary force-cancels whatever is left.
pub struct ShutdownCoordinator {
    tx: watch::Sender<bool>,
}

/// Cheap cloneable handle observed by every loop and blocking step.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves when shutdown has been requested. Safe to call repeatedly.
    pub async fn cancelled(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        // Sender dropping also means the process is going down.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Install SIGINT/SIGTERM handlers that trigger the shutdown signal.
    pub fn install_signal_handlers(&self) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                ) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "failed to install SIGTERM handler");
                        let _ = ctrl_c.await;
                        let _ = tx.send(true);
                        return;
                    }
                };
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, beginning graceful shutdown"),
                    _ = sigterm.recv() => info!("received SIGTERM, beginning graceful shutdown"),
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
                info!("received ctrl-c, beginning graceful shutdown");
            }
            let _ = tx.send(true);
        });
    }

    /// Trigger shutdown programmatically (tests, fatal startup errors).
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_unblocks_waiters() {
        let coordinator = ShutdownCoordinator::new();
        let mut signal = coordinator.signal();
        assert!(!signal.is_cancelled());

        coordinator.trigger();
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        let mut signal = coordinator.signal();
        coordinator.trigger();
        signal.cancelled().await;
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }
}
