//! Background eviction of idle breaker records.
//!
//! # Responsibilities
//! - Remove CLOSED records unused for longer than the staleness TTL
//! - Run that sweep periodically on its own task
//!
//! # Design Decisions
//! - OPEN and HALF_OPEN records are never evicted; dropping them would
//!   discard earned backoff and let a failing target flap back to CLOSED
//! - Start/stop are idempotent; at most one sweep loop per pruner
//! - Dropping the pruner drops the stop sender, which also ends the loop

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::BreakerConfig;
use crate::observability::metrics;
use crate::resilience::breaker_store::BreakerStore;

struct PruneTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the periodic breaker sweep.
pub struct BreakerPruner {
    store: Arc<BreakerStore>,
    ttl: Duration,
    interval: Duration,
    task: Mutex<Option<PruneTask>>,
}

impl BreakerPruner {
    pub fn new(store: Arc<BreakerStore>, config: &BreakerConfig) -> Self {
        Self {
            store,
            ttl: Duration::from_secs(config.prune_ttl_secs),
            interval: Duration::from_secs(config.prune_interval_secs.max(1)),
            task: Mutex::new(None),
        }
    }

    /// Override the sweep timing (sub-second values are useful in tests).
    pub fn with_timing(mut self, ttl: Duration, interval: Duration) -> Self {
        self.ttl = ttl;
        self.interval = interval;
        self
    }

    /// Remove idle CLOSED records now. Returns the number removed.
    pub fn prune_stale_breakers(&self) -> usize {
        sweep(&self.store, self.ttl)
    }

    /// Start the periodic sweep. Returns false if it was already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            tracing::debug!("Breaker pruning already running");
            return false;
        }

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let store = self.store.clone();
        let ttl = self.ttl;
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweep(&store, ttl);
                    }
                    _ = &mut stop_rx => {
                        tracing::debug!("Breaker pruning loop exiting");
                        break;
                    }
                }
            }
        });

        tracing::info!(
            interval_secs = interval.as_secs_f64(),
            ttl_secs = ttl.as_secs_f64(),
            "Breaker pruning started"
        );
        *task = Some(PruneTask {
            stop: stop_tx,
            handle,
        });
        true
    }

    /// Stop the periodic sweep. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match task {
            Some(task) => {
                let _ = task.stop.send(());
                tracing::info!("Breaker pruning stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }
}

impl std::fmt::Debug for BreakerPruner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerPruner")
            .field("ttl", &self.ttl)
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

fn sweep(store: &BreakerStore, ttl: Duration) -> usize {
    let removed = store.remove_stale(ttl, Instant::now());
    if removed > 0 {
        tracing::debug!(removed, remaining = store.len(), "Pruned stale circuit breakers");
        metrics::record_breakers_pruned(removed);
    }
    removed
}
