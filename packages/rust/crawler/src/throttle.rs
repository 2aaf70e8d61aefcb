//! Politeness throttle: bounded concurrency plus a minimum gap between
//! request starts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use docmap_shared::FetchError;

/// Shared by every fetch in a session.
pub struct Throttle {
    permits: Arc<Semaphore>,
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait for a concurrency permit and for this request's start slot.
    ///
    /// Slots are reserved under the lock and slept on outside it, so waiters
    /// queue up behind each other without serializing the sleep itself.
    pub async fn acquire(&self) -> Result<ThrottlePermit, FetchError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FetchError::ConnectionFailure("throttle closed".into()))?;

        let start_at = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot
        };
        tokio::time::sleep_until(start_at).await;

        Ok(ThrottlePermit { _permit: permit })
    }
}

/// Releases the concurrency slot when dropped.
pub struct ThrottlePermit {
    _permit: OwnedSemaphorePermit,
}
