//! Bounded worker pool for parallel phases.
//!
//! A counting semaphore with FIFO admission: released permits go to the
//! longest-waiting task. This is the only synchronization primitive the
//! runners need.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    /// A pool admitting at most `max` concurrent workers (minimum 1).
    pub fn new(max: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max.max(1))),
        }
    }

    /// Wait for a slot. The permit releases the slot on drop.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Worker pool closed")
    }

    pub fn capacity(&self) -> usize {
        self.semaphore.available_permits()
    }
}
