//! Concurrency limiter for block uploads.
//!
//! [`ConcurrencyLimiter`] caps the number of in-flight uploads using a tokio semaphore. Each
//! acquired [`ConcurrencyPermit`] releases its slot on drop, so a slot is returned on every exit
//! path of an upload task.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Limits concurrent uploads and tracks the in-flight count.
///
/// Permits are acquired with [`acquire`](Self::acquire) and automatically returned when the
/// [`ConcurrencyPermit`] is dropped, on success, error and panic alike.
#[derive(Clone, Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyLimiter {
    /// Creates a new limiter with the given maximum number of permits.
    pub fn new(max: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
            peak: Arc::default(),
        }
    }

    /// Waits for a free slot and acquires it.
    pub async fn acquire(&self) -> ConcurrencyPermit {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("upload semaphore is never closed");
        self.permit(permit)
    }

    /// Acquires a slot if one is free right now.
    pub fn try_acquire(&self) -> Option<ConcurrencyPermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(self.permit(permit))
    }

    fn permit(&self, permit: OwnedSemaphorePermit) -> ConcurrencyPermit {
        self.peak.fetch_max(self.used_permits(), Ordering::Relaxed);
        ConcurrencyPermit { _permit: permit }
    }

    /// The maximum number of permits.
    pub fn max_permits(&self) -> usize {
        self.max
    }

    /// Returns the number of permits currently held.
    pub fn used_permits(&self) -> usize {
        self.max - self.semaphore.available_permits()
    }

    /// Returns the highest number of permits held at the same time.
    pub fn peak_permits(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}

/// RAII guard for a concurrency permit.
///
/// Dropping this permit releases it back to the [`ConcurrencyLimiter`].
#[derive(Debug)]
pub struct ConcurrencyPermit {
    _permit: OwnedSemaphorePermit,
}
