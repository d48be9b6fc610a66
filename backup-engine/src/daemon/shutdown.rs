//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! On a signal every running task is stopped: workers finish or abandon the
//! file they hold, partial files are removed and the run ends Cancelled.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown coordinator
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled once shutdown begins
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for SIGINT or SIGTERM, then cancel the token.
    ///
    /// Returns `false` when shutdown was triggered some other way first.
    pub async fn wait_for_signal(&self) -> bool {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), stopping running backups...");
            }
            _ = terminate => {
                info!("Received SIGTERM, stopping running backups...");
            }
            _ = self.token.cancelled() => return false,
        }

        self.trigger();
        true
    }

    /// Begin shutdown without a signal
    pub fn trigger(&self) {
        self.token.cancel();
    }
}
