//! crates/chat_relay_core/src/gate.rs
//!
//! Bounds how many outbound completion calls run at the same time.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("All completion slots are busy")]
    Busy,
    #[error("The completion gate has been closed")]
    Closed,
}

/// A slot in the gate. The slot is returned when this value is dropped.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

/// A counting gate. Waiters are served in FIFO order.
#[derive(Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    max_pending: Option<usize>,
    pending: AtomicUsize,
}

struct PendingSlot<'a>(&'a AtomicUsize);

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyGate {
    /// Creates a gate with `capacity` slots.
    ///
    /// With `max_pending` set, callers beyond that many waiters are turned away
    /// with [`GateError::Busy`] instead of queueing.
    pub fn new(capacity: usize, max_pending: Option<usize>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            max_pending,
            pending: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub async fn acquire(&self) -> Result<GatePermit, GateError> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(GatePermit { _permit: permit });
        }

        let waiting = self.pending.fetch_add(1, Ordering::SeqCst);
        let _slot = PendingSlot(&self.pending);
        if let Some(max_pending) = self.max_pending {
            if waiting >= max_pending {
                warn!(waiting, max_pending, "Completion queue is full; rejecting caller");
                return Err(GateError::Busy);
            }
        }

        debug!(waiting = waiting + 1, "Waiting for a completion slot");
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GateError::Closed)?;
        Ok(GatePermit { _permit: permit })
    }

    /// Runs `fut` while holding a slot.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, GateError>
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(fut.await)
    }
}
