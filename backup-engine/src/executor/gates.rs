//! Scheduling gates shared by every worker.
//!
//! `LargeFileGate` admits one large transfer at a time across all jobs.
//! `PriorityGate` counts priority files in flight; non-priority work parks
//! until the count drops to zero.

use crate::utils::errors::{EngineError, Result};
use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Binary gate for files above the large-file threshold
#[derive(Debug, Clone)]
pub struct LargeFileGate {
    permits: Arc<Semaphore>,
}

impl LargeFileGate {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait for the gate. The permit is released on drop.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit> {
        let permits = Arc::clone(&self.permits);
        tokio::select! {
            permit = permits.acquire_owned() => {
                permit.map_err(|_| EngineError::Cancelled)
            }
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
        }
    }

    pub fn is_held(&self) -> bool {
        self.permits.available_permits() == 0
    }
}

impl Default for LargeFileGate {
    fn default() -> Self {
        Self::new()
    }
}

/// In-flight counter for priority files
#[derive(Debug, Clone)]
pub struct PriorityGate {
    in_flight: Arc<watch::Sender<usize>>,
}

/// Marks one priority file as in flight until dropped
#[derive(Debug)]
pub struct PriorityGuard {
    in_flight: Arc<watch::Sender<usize>>,
}

impl Drop for PriorityGuard {
    fn drop(&mut self) {
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl PriorityGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0usize);
        Self {
            in_flight: Arc::new(tx),
        }
    }

    pub fn enter(&self) -> PriorityGuard {
        self.in_flight.send_modify(|n| *n += 1);
        PriorityGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Park until no priority file is in flight.
    pub async fn wait_clear(&self, cancel: &CancellationToken) -> Result<()> {
        let mut rx = self.in_flight.subscribe();
        tokio::select! {
            result = rx.wait_for(|n| *n == 0) => {
                result.map(|_| ()).map_err(|_| EngineError::Cancelled)
            }
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
        }
    }
}

impl Default for PriorityGate {
    fn default() -> Self {
        Self::new()
    }
}
