//! Bounded concurrency gates.
//!
//! A [`Gate`] is a named counting semaphore. Waiters are served strictly in
//! the order they called [`Gate::acquire`]; a released slot is handed to the
//! oldest waiter directly, so it can neither be lost nor granted twice.
//!
//! The engine owns four independent gates (whole-file uploads, upload chunk
//! requests, whole-file downloads, download chunk requests). Holding one says
//! nothing about the others.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Returned when a gate was purged while the caller was waiting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("gate {0} was purged")]
    Purged(&'static str),
}

/// A counting semaphore with FIFO hand-off and a hard-shutdown purge.
pub struct Gate {
    name: &'static str,
    capacity: usize,
    // Swapped for a fresh pool on purge; permits of the retired pool drain
    // back into it and never touch the new one.
    pool: Mutex<Arc<Semaphore>>,
}

/// One occupied slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl Gate {
    /// Creates a gate with `capacity` slots (at least one).
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            capacity,
            pool: Mutex::new(Arc::new(Semaphore::new(capacity))),
        }
    }

    /// Waits for a free slot.
    ///
    /// There is no timeout; race the returned future against a cancellation
    /// token if the caller must be able to give up.
    pub async fn acquire(&self) -> Result<GatePermit, GateError> {
        let pool = self.current();
        match pool.acquire_owned().await {
            Ok(permit) => Ok(GatePermit { _permit: permit }),
            Err(_) => Err(GateError::Purged(self.name)),
        }
    }

    /// Takes a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.current()
            .try_acquire_owned()
            .ok()
            .map(|permit| GatePermit { _permit: permit })
    }

    /// Rejects every queued waiter and resets the gate to zero slots in use.
    pub fn purge(&self) {
        let retired = {
            let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *pool, Arc::new(Semaphore::new(self.capacity)))
        };
        let held = self.capacity - retired.available_permits();
        retired.close();
        if held > 0 {
            warn!(gate = self.name, held, "gate purged with slots still held");
        } else {
            debug!(gate = self.name, "gate purged");
        }
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.capacity - self.current().available_permits()
    }

    /// Maximum number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Gate name, used in logs and errors.
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn current(&self) -> Arc<Semaphore> {
        Arc::clone(&self.pool.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("in_use", &self.in_use())
            .finish()
    }
}
