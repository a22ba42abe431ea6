//! Circuit breaker for upstream target protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: target assumed down, calls fail fast
//! - Half-Open: a single probe call tests whether the target recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold
//! Open → Half-Open: first allow() after recovery_timeout (caller becomes the probe)
//! Half-Open → Closed: success_count >= success_threshold
//! Half-Open → Open: any probe failure (recovery clock restarts)
//! ```
//!
//! # Design Decisions
//! - Per-target breaker, keyed by upstream endpoint ID
//! - The Open → Half-Open flip and probe reservation happen under the
//!   record's shard lock, so concurrent callers cannot both become the probe
//! - A probe whose caller never reports back is reclaimed after another
//!   recovery_timeout, otherwise the target would stay half-open forever

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::config::BreakerConfig;
use crate::observability::metrics;
use crate::resilience::breaker_store::{BreakerRecord, BreakerState, BreakerStore};

/// Point-in-time view of one target's breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStats {
    pub state: BreakerState,
    pub failures: u32,
    pub successes: u32,
    /// Milliseconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<u64>,
}

impl BreakerStats {
    fn closed() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: 0,
            successes: 0,
            last_failure: None,
        }
    }

    fn from_record(record: &BreakerRecord) -> Self {
        Self {
            state: record.state,
            failures: record.failure_count,
            successes: record.success_count,
            last_failure: record.last_failure_at.and_then(epoch_millis),
        }
    }
}

/// Aggregate view over every tracked target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetBreakerStats {
    /// OPEN if any target is open, else HALF_OPEN if any is probing, else CLOSED.
    pub state: BreakerState,
    pub failures: u32,
    pub successes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<u64>,
    pub by_endpoint: BTreeMap<String, BreakerStats>,
}

/// Per-target circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    store: Arc<BreakerStore>,
    failure_threshold: u32,
    success_threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(store: Arc<BreakerStore>, config: &BreakerConfig) -> Self {
        Self {
            store,
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            recovery_timeout: Duration::from_millis(config.recovery_timeout_ms),
        }
    }

    /// The underlying record store.
    pub fn store(&self) -> &Arc<BreakerStore> {
        &self.store
    }

    /// Whether a call to `key` may proceed now.
    ///
    /// When an open circuit's recovery timeout has elapsed, the first caller
    /// flips it to half-open and is admitted as the probe; everyone else is
    /// rejected until the probe reports back.
    pub fn allow(&self, key: &str) -> bool {
        let recovery = self.recovery_timeout;
        let (allowed, entered_half_open) = self.store.update(key, |record| {
            let now = Instant::now();
            record.last_used_at = now;
            match record.state {
                BreakerState::Closed => (true, false),
                BreakerState::Open => {
                    let elapsed = record
                        .opened_at
                        .map(|opened| now.saturating_duration_since(opened))
                        .unwrap_or(Duration::MAX);
                    if elapsed >= recovery {
                        record.state = BreakerState::HalfOpen;
                        record.success_count = 0;
                        record.probe_started_at = Some(now);
                        (true, true)
                    } else {
                        (false, false)
                    }
                }
                BreakerState::HalfOpen => match record.probe_started_at {
                    Some(started) if now.saturating_duration_since(started) < recovery => {
                        (false, false)
                    }
                    _ => {
                        record.probe_started_at = Some(now);
                        (true, false)
                    }
                },
            }
        });

        if entered_half_open {
            tracing::info!(endpoint = %key, "Circuit breaker half-open, admitting probe");
            metrics::record_breaker_state(key, BreakerState::HalfOpen);
        } else if !allowed {
            tracing::debug!(endpoint = %key, "Circuit breaker rejecting call");
        }
        allowed
    }

    /// Report a successful call to `key`.
    pub fn record_success(&self, key: &str) {
        let threshold = self.success_threshold;
        let previous = self.store.update(key, |record| {
            record.last_used_at = Instant::now();
            let previous = record.state;
            match record.state {
                BreakerState::Closed => {
                    record.failure_count = 0;
                }
                BreakerState::HalfOpen => {
                    record.success_count = record.success_count.saturating_add(1);
                    record.probe_started_at = None;
                    if record.success_count >= threshold {
                        record.state = BreakerState::Closed;
                        record.failure_count = 0;
                        record.success_count = 0;
                        record.opened_at = None;
                    }
                }
                BreakerState::Open => {}
            }
            (previous, record.state)
        });

        match previous {
            (BreakerState::HalfOpen, BreakerState::Closed) => {
                tracing::info!(endpoint = %key, "Circuit breaker closed after successful recovery");
                metrics::record_breaker_state(key, BreakerState::Closed);
            }
            (BreakerState::Open, _) => {
                tracing::warn!(endpoint = %key, "Unexpected success reported for open circuit");
            }
            _ => {}
        }
    }

    /// Report a failed call to `key`.
    pub fn record_failure(&self, key: &str) {
        let threshold = self.failure_threshold;
        let transition = self.store.update(key, |record| {
            let now = Instant::now();
            record.last_used_at = now;
            let previous = record.state;
            match record.state {
                BreakerState::Closed => {
                    record.failure_count = record.failure_count.saturating_add(1);
                    record.last_failure_at = Some(SystemTime::now());
                    if record.failure_count >= threshold {
                        record.state = BreakerState::Open;
                        record.opened_at = Some(now);
                    }
                }
                BreakerState::HalfOpen => {
                    record.state = BreakerState::Open;
                    record.opened_at = Some(now);
                    record.success_count = 0;
                    record.probe_started_at = None;
                    record.last_failure_at = Some(SystemTime::now());
                }
                BreakerState::Open => {}
            }
            (previous, record.state, record.failure_count)
        });

        match transition {
            (BreakerState::Closed, BreakerState::Open, failures) => {
                tracing::warn!(endpoint = %key, failures, "Circuit breaker opened");
                metrics::record_breaker_state(key, BreakerState::Open);
            }
            (BreakerState::HalfOpen, BreakerState::Open, _) => {
                tracing::warn!(endpoint = %key, "Circuit breaker reopened after failed probe");
                metrics::record_breaker_state(key, BreakerState::Open);
            }
            _ => {}
        }
    }

    /// Current state for `key` (CLOSED if untracked).
    pub fn state(&self, key: &str) -> BreakerState {
        self.store
            .get(key)
            .map(|r| r.state)
            .unwrap_or(BreakerState::Closed)
    }

    /// Stats for one target. Does not create a record.
    pub fn stats(&self, key: &str) -> BreakerStats {
        self.store
            .get(key)
            .map(|r| BreakerStats::from_record(&r))
            .unwrap_or_else(BreakerStats::closed)
    }

    /// Aggregate stats across every tracked target.
    pub fn fleet_stats(&self) -> FleetBreakerStats {
        let mut fleet = FleetBreakerStats {
            state: BreakerState::Closed,
            failures: 0,
            successes: 0,
            last_failure: None,
            by_endpoint: BTreeMap::new(),
        };

        for (key, record) in self.store.snapshot() {
            let stats = BreakerStats::from_record(&record);
            fleet.state = match (fleet.state, stats.state) {
                (BreakerState::Open, _) | (_, BreakerState::Open) => BreakerState::Open,
                (BreakerState::HalfOpen, _) | (_, BreakerState::HalfOpen) => BreakerState::HalfOpen,
                _ => BreakerState::Closed,
            };
            fleet.failures = fleet.failures.saturating_add(stats.failures);
            fleet.successes = fleet.successes.saturating_add(stats.successes);
            fleet.last_failure = fleet.last_failure.max(stats.last_failure);
            fleet.by_endpoint.insert(key, stats);
        }

        fleet
    }

    /// Forget every record.
    pub fn reset_all(&self) {
        self.store.clear();
    }
}

fn epoch_millis(t: SystemTime) -> Option<u64> {
    t.duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64)
}
