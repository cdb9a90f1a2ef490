//! Bounded admission in front of the connection pool.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::warn;

use super::{StorageError, StorageResult};

/// Caps the number of storage operations in flight or waiting.
///
/// `pool_size` callers hold a connection, up to `queue_limit` more may wait
/// for one. Anything beyond that is turned away with
/// [`StorageError::Saturated`] instead of queueing without bound.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new(pool_size: u32, queue_limit: u32) -> Self {
        let capacity = pool_size as usize + queue_limit as usize;
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn admit(&self) -> StorageResult<OwnedSemaphorePermit> {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => Ok(permit),
            Err(TryAcquireError::NoPermits) => {
                warn!(capacity = self.capacity, "storage admission queue is full");
                Err(StorageError::Saturated)
            }
            Err(TryAcquireError::Closed) => Err(StorageError::Database(sqlx::Error::PoolClosed)),
        }
    }

    pub fn close(&self) {
        self.permits.close();
    }
}
