//! Two-tier request admission.
//!
//! A request first takes a slot in the admission queue without waiting. If
//! the queue is full it is rejected at once. Holding the queue slot it then
//! waits, with no timeout, for a serving slot, and gives the queue slot back
//! as soon as it has one. The serving slot is held until the returned
//! [`ServingPermit`] is dropped.
//!
//! Health checks never touch either pool.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use vmruntime_config::AdmissionConfig;

/// Path of the health-check endpoint.
pub const HEALTH_CHECK_PATH: &str = "/_ah/health";

/// Body of the response sent to rejected requests.
pub const OVERLOADED_BODY: &str = "Server is too busy, please try again later.";

/// Returns `true` when `path` is the health-check endpoint.
#[must_use]
pub fn is_health_check(path: &str) -> bool {
    path == HEALTH_CHECK_PATH
}

/// Admission failure.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// Every queue slot is taken.
    #[error("admission queue is full ({queue_size} slots)")]
    CapacityExceeded {
        /// Configured queue size.
        queue_size: usize,
    },
}

/// Outcome of a successful admission.
#[derive(Debug)]
pub enum Admission {
    /// Health checks skip the gate.
    Bypass,
    /// The request holds a serving slot.
    Admitted(ServingPermit),
}

impl Admission {
    /// Returns `true` for [`Admission::Bypass`].
    #[must_use]
    pub const fn is_bypass(&self) -> bool {
        matches!(self, Self::Bypass)
    }
}

/// Lease on a serving slot, released on drop.
#[derive(Debug)]
pub struct ServingPermit {
    _permit: OwnedSemaphorePermit,
}

/// Concurrency limiter made of a serving pool and an admission queue.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    serving: Arc<Semaphore>,
    queue: Arc<Semaphore>,
    serving_pool_size: usize,
    queue_size: usize,
}

impl AdmissionGate {
    /// Creates a gate with explicit pool sizes.
    #[must_use]
    pub fn new(serving_pool_size: usize, queue_size: usize) -> Self {
        Self {
            serving: Arc::new(Semaphore::new(serving_pool_size)),
            queue: Arc::new(Semaphore::new(queue_size)),
            serving_pool_size,
            queue_size,
        }
    }

    /// Creates a gate sized from configuration.
    ///
    /// A non-threadsafe application gets a single serving slot.
    #[must_use]
    pub fn from_config(config: &AdmissionConfig, threadsafe: bool) -> Self {
        Self::new(
            config.serving_pool_size(threadsafe),
            config.effective_queue_size(threadsafe),
        )
    }

    /// Admits a request for `path`, waiting for a serving slot if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::CapacityExceeded`] without waiting when the
    /// queue is full.
    pub async fn try_admit(&self, path: &str) -> Result<Admission, AdmissionError> {
        if is_health_check(path) {
            return Ok(Admission::Bypass);
        }

        let rejected = AdmissionError::CapacityExceeded {
            queue_size: self.queue_size,
        };
        let queued = Arc::clone(&self.queue)
            .try_acquire_owned()
            .map_err(|_| rejected)?;

        // The semaphores are never closed, so this only fails on a bug.
        let serving = Arc::clone(&self.serving)
            .acquire_owned()
            .await
            .map_err(|_| rejected)?;
        drop(queued);

        Ok(Admission::Admitted(ServingPermit { _permit: serving }))
    }

    /// Returns the number of serving slots.
    #[must_use]
    pub const fn serving_pool_size(&self) -> usize {
        self.serving_pool_size
    }

    /// Returns the number of queue slots.
    #[must_use]
    pub const fn queue_size(&self) -> usize {
        self.queue_size
    }

    /// Returns the number of free serving slots.
    #[must_use]
    pub fn available_serving(&self) -> usize {
        self.serving.available_permits()
    }

    /// Returns the number of free queue slots.
    #[must_use]
    pub fn available_queue(&self) -> usize {
        self.queue.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_health_check_bypasses() {
        let gate = AdmissionGate::new(1, 1);
        let _held = gate.try_admit("/work").await.unwrap();

        let admission = gate.try_admit(HEALTH_CHECK_PATH).await.unwrap();
        assert!(admission.is_bypass());
        assert_eq!(gate.available_queue(), 1);
    }

    #[tokio::test]
    async fn test_queue_released_once_serving() {
        let gate = AdmissionGate::new(2, 1);
        let first = gate.try_admit("/a").await.unwrap();
        let second = gate.try_admit("/b").await.unwrap();

        assert!(!first.is_bypass());
        assert_eq!(gate.available_serving(), 0);
        assert_eq!(gate.available_queue(), 1);

        drop(second);
        assert_eq!(gate.available_serving(), 1);
    }

    #[tokio::test]
    async fn test_rejects_when_queue_full() {
        let gate = AdmissionGate::new(1, 1);
        let serving = gate.try_admit("/a").await.unwrap();

        let waiting_gate = gate.clone();
        let waiter = tokio::spawn(async move { waiting_gate.try_admit("/b").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(gate.available_queue(), 0);

        let err = gate.try_admit("/c").await.unwrap_err();
        assert_eq!(err, AdmissionError::CapacityExceeded { queue_size: 1 });

        drop(serving);
        let admitted = waiter.await.unwrap().unwrap();
        assert!(!admitted.is_bypass());
        assert_eq!(gate.available_queue(), 1);
    }

    #[test]
    fn test_from_config_non_threadsafe() {
        let gate = AdmissionGate::from_config(&AdmissionConfig::default(), false);
        assert_eq!(gate.serving_pool_size(), 1);
        assert_eq!(gate.queue_size(), 1 + 501);
    }
}
