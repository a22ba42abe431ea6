//! Process-wide concurrency limiter for upstream calls.
//!
//! # Responsibilities
//! - Bound simultaneously in-flight calls to `max_concurrent`
//! - Queue excess callers in FIFO arrival order
//! - Release the slot when the task finishes, fails, or is dropped
//!
//! # Design Decisions
//! - Target-agnostic: the upstream is one service however many endpoints it fronts
//! - Tokio's semaphore is fair and removes a waiter whose future is dropped,
//!   so a cancelled caller leaves no phantom queue entry
//! - `reset` swaps in a fresh semaphore and closes the old one, which zeroes
//!   the in-flight count and wakes queued callers with `LimiterError::Closed`

use arc_swap::ArcSwap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::observability::metrics;

/// Errors returned by the limiter.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LimiterError {
    /// The limiter was reset while the caller was queued.
    #[error("concurrency limiter was reset while waiting for a slot")]
    Closed,
}

/// Bounds concurrent upstream calls.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: ArcSwap<Semaphore>,
    max_concurrent: usize,
    waiting: Arc<AtomicUsize>,
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: ArcSwap::from_pointee(Semaphore::new(max_concurrent)),
            max_concurrent,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run `task` once a slot is free.
    pub async fn run<F, T>(&self, task: F) -> Result<T, LimiterError>
    where
        F: Future<Output = T>,
    {
        let permit = self.acquire().await?;
        metrics::record_limiter_in_flight(self.in_flight());
        let output = task.await;
        drop(permit);
        metrics::record_limiter_in_flight(self.in_flight());
        Ok(output)
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, LimiterError> {
        let semaphore = self.semaphore.load_full();
        if let Ok(permit) = semaphore.clone().try_acquire_owned() {
            return Ok(permit);
        }

        let _waiting = WaitingGuard::new(self.waiting.clone());
        tracing::trace!(
            in_flight = self.in_flight(),
            queued = self.queued(),
            "Upstream concurrency limit reached, queueing call"
        );
        semaphore
            .acquire_owned()
            .await
            .map_err(|_| LimiterError::Closed)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Calls currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.semaphore.load().available_permits())
    }

    /// Calls waiting for a slot.
    pub fn queued(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    /// Zero the in-flight count and clear the queue.
    pub fn reset(&self) {
        let previous = self
            .semaphore
            .swap(Arc::new(Semaphore::new(self.max_concurrent)));
        previous.close();
        metrics::record_limiter_in_flight(0);
    }
}

/// Tracks one queued caller; decremented however the wait ends.
struct WaitingGuard {
    waiting: Arc<AtomicUsize>,
}

impl WaitingGuard {
    fn new(waiting: Arc<AtomicUsize>) -> Self {
        waiting.fetch_add(1, Ordering::Relaxed);
        Self { waiting }
    }
}

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        let limiter = Arc::new(ConcurrencyLimiter::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let limiter = limiter.clone();
                let running = running.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    limiter
                        .run(async {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            running.fetch_sub(1, Ordering::SeqCst);
                        })
                        .await
                })
            })
            .collect();

        for result in futures_util::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.queued(), 0);
    }

    #[tokio::test]
    async fn test_waiters_released_fifo() {
        let limiter = Arc::new(ConcurrencyLimiter::new(1));
        let order = Arc::new(Mutex::new(Vec::new()));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let holder = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter
                    .run(async {
                        let _ = release_rx.await;
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut waiters = Vec::new();
        for i in 0..4 {
            let limiter = limiter.clone();
            let order = order.clone();
            waiters.push(tokio::spawn(async move {
                limiter
                    .run(async {
                        order.lock().unwrap().push(i);
                    })
                    .await
            }));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(limiter.queued(), 4);

        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();
        for w in waiters {
            w.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failed_task_releases_slot() {
        let limiter = ConcurrencyLimiter::new(1);
        let result: Result<Result<(), &str>, _> = limiter.run(async { Err("boom") }).await;
        assert_eq!(result.unwrap(), Err("boom"));
        assert_eq!(limiter.in_flight(), 0);

        let ok = limiter.run(async { 7 }).await.unwrap();
        assert_eq!(ok, 7);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_no_phantom_slot() {
        let limiter = Arc::new(ConcurrencyLimiter::new(1));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let holder = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter
                    .run(async {
                        let _ = release_rx.await;
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), limiter.run(async {})).await;
        assert!(timed_out.is_err());
        assert_eq!(limiter.queued(), 0);

        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();

        assert_eq!(limiter.in_flight(), 0);
        let done = tokio::time::timeout(Duration::from_millis(100), limiter.run(async { 1 }))
            .await
            .expect("slot should be free")
            .unwrap();
        assert_eq!(done, 1);
    }

    #[tokio::test]
    async fn test_reset_clears_waiters_and_counter() {
        let limiter = Arc::new(ConcurrencyLimiter::new(1));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let holder = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter
                    .run(async {
                        let _ = release_rx.await;
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(limiter.in_flight(), 1);

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.run(async {}).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(limiter.queued(), 1);

        limiter.reset();

        assert_eq!(waiter.await.unwrap(), Err(LimiterError::Closed));
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(limiter.queued(), 0);

        // The old holder finishing must not disturb the fresh semaphore
        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();
        assert_eq!(limiter.in_flight(), 0);
    }

    #[test]
    fn test_zero_limit_clamped() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.max_concurrent(), 1);
    }
}
