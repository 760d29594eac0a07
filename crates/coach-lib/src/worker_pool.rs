//! Fixed-capacity pool for CPU-bound pipeline stages
//!
//! Work runs on Tokio's blocking threads, gated by a fair semaphore so at
//! most `capacity` units execute at once across all users; further
//! submissions queue FIFO. The permit travels with the unit of work, so a
//! dispatched unit keeps its slot until it returns even when the caller
//! stops waiting for the result.
//!
//! Dropping the future returned by [`WorkerPool::submit`] before a slot is
//! granted means the work never starts. Dropping it afterwards only
//! discards the result.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Default number of concurrent workers
pub const DEFAULT_CAPACITY: usize = 2;

/// Errors surfaced by the worker pool
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("worker pool is shut down")]
    ShutDown,
    #[error("worker crashed: {0}")]
    Crashed(String),
}

/// Fixed-size pool of blocking workers
#[derive(Debug)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    tracker: TaskTracker,
    in_flight: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl WorkerPool {
    /// Create a pool running at most `capacity` units concurrently.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "worker pool capacity must be > 0");
        info!(capacity, "Starting worker pool");
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            tracker: TaskTracker::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run `work` on a worker once a slot is free.
    pub async fn submit<F, R>(&self, work: F) -> Result<R, WorkerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permit = {
            let _queued = CounterGuard::enter(&self.queued);
            self.semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::ShutDown)?
        };

        let in_flight = self.in_flight.clone();
        in_flight.fetch_add(1, Ordering::Relaxed);

        let handle = self.tracker.spawn_blocking(move || {
            let _permit = permit;
            let _running = CounterGuard::adopt(&in_flight);
            work()
        });

        handle.await.map_err(|e| {
            if e.is_panic() {
                let message = panic_message(e.into_panic());
                warn!(error = %message, "Worker panicked");
                WorkerError::Crashed(message)
            } else {
                WorkerError::Crashed("worker task was aborted".to_string())
            }
        })
    }

    /// Maximum concurrent units
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Units currently executing
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Submissions waiting for a slot
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Stop accepting work and wait for dispatched units to finish.
    pub async fn shutdown(&self) {
        info!(in_flight = self.in_flight(), "Shutting down worker pool");
        self.semaphore.close();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("Worker pool drained");
    }
}

/// Decrements a counter when dropped
struct CounterGuard {
    counter: Arc<AtomicUsize>,
}

impl CounterGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self::adopt(counter)
    }

    /// Take over a count that was already incremented
    fn adopt(counter: &Arc<AtomicUsize>) -> Self {
        Self {
            counter: counter.clone(),
        }
    }
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
