//! Per-target circuit breaker records.
//!
//! # Responsibilities
//! - Hold one `BreakerRecord` per upstream target key
//! - Create records lazily on first touch
//! - Evict idle CLOSED records on request
//!
//! # Design Decisions
//! - Pure state, no I/O and no policy; transitions live in circuit_breaker.rs
//! - DashMap shard locks make each `update` closure an atomic read-modify-write

use dashmap::DashMap;
use serde::Serialize;
use std::time::{Duration, Instant, SystemTime};

/// Breaker state for a single target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    /// Gauge value used for metrics (0=closed, 1=half-open, 2=open).
    pub fn as_gauge(self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::HalfOpen => 1.0,
            BreakerState::Open => 2.0,
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "CLOSED"),
            BreakerState::Open => write!(f, "OPEN"),
            BreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Breaker bookkeeping for one target.
#[derive(Debug, Clone)]
pub struct BreakerRecord {
    pub state: BreakerState,
    /// Consecutive failures while CLOSED.
    pub failure_count: u32,
    /// Probe successes while HALF_OPEN.
    pub success_count: u32,
    /// Wall-clock time of the most recent failure, for reporting.
    pub last_failure_at: Option<SystemTime>,
    /// Most recent allow/record call. Drives pruning.
    pub last_used_at: Instant,
    /// When the record last entered OPEN.
    pub opened_at: Option<Instant>,
    /// When the outstanding HALF_OPEN probe was admitted.
    pub probe_started_at: Option<Instant>,
}

impl BreakerRecord {
    pub fn new(now: Instant) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            last_used_at: now,
            opened_at: None,
            probe_started_at: None,
        }
    }

    /// True if the record may be forgotten without losing backoff state.
    pub fn is_stale(&self, ttl: Duration, now: Instant) -> bool {
        self.state == BreakerState::Closed
            && now.saturating_duration_since(self.last_used_at) > ttl
    }
}

/// Concurrent map of target key -> breaker record.
#[derive(Debug, Default)]
pub struct BreakerStore {
    records: DashMap<String, BreakerRecord>,
}

impl BreakerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` to the record for `key`, creating it if needed.
    ///
    /// The shard lock is held for the duration of `f`, so a check-and-set
    /// performed inside the closure cannot interleave with another caller.
    pub fn update<R>(&self, key: &str, f: impl FnOnce(&mut BreakerRecord) -> R) -> R {
        if let Some(mut record) = self.records.get_mut(key) {
            return f(record.value_mut());
        }
        let mut record = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| BreakerRecord::new(Instant::now()));
        f(record.value_mut())
    }

    /// Copy of the record for `key`, if one exists.
    pub fn get(&self, key: &str) -> Option<BreakerRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    /// Copy of every record.
    pub fn snapshot(&self) -> Vec<(String, BreakerRecord)> {
        self.records
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// Remove CLOSED records idle for longer than `ttl`. Returns the count removed.
    pub fn remove_stale(&self, ttl: Duration, now: Instant) -> usize {
        let mut removed = 0;
        self.records.retain(|_, record| {
            if record.is_stale(ttl, now) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn clear(&self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
