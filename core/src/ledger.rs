//! Failure accounting for the trip decision
//!
//! Two modes, picked once from `Config::window_size`:
//! - `Unbounded`: a plain counter, only cleared on success or on probe entry
//! - `Windowed`: failure timestamps, pruned to the trailing window on every access

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Qualifying failures recorded since the last clear
#[derive(Debug, Clone)]
pub enum FailureLedger {
    Unbounded { count: usize },
    Windowed {
        window: Duration,
        /// Oldest first
        failures: VecDeque<Instant>,
    },
}

impl FailureLedger {
    /// Create a ledger; a zero window means unbounded counting
    pub fn new(window: Duration) -> Self {
        if window.is_zero() {
            FailureLedger::Unbounded { count: 0 }
        } else {
            FailureLedger::Windowed {
                window,
                failures: VecDeque::new(),
            }
        }
    }

    /// Record one qualifying failure observed at `now`
    pub fn record_failure(&mut self, now: Instant) {
        self.prune(now);
        match self {
            FailureLedger::Unbounded { count } => *count += 1,
            FailureLedger::Windowed { failures, .. } => failures.push_back(now),
        }
    }

    /// Whether the surviving failures reach `threshold`
    pub fn should_trip(&mut self, now: Instant, threshold: usize) -> bool {
        self.prune(now);
        self.len() >= threshold
    }

    pub fn clear(&mut self) {
        match self {
            FailureLedger::Unbounded { count } => *count = 0,
            FailureLedger::Windowed { failures, .. } => failures.clear(),
        }
    }

    /// Number of retained failures (not pruned)
    pub fn len(&self) -> usize {
        match self {
            FailureLedger::Unbounded { count } => *count,
            FailureLedger::Windowed { failures, .. } => failures.len(),
        }
    }

    /// Failures still inside the window at `now`, without pruning
    pub fn count(&self, now: Instant) -> usize {
        match self {
            FailureLedger::Unbounded { count } => *count,
            FailureLedger::Windowed { window, failures } => failures
                .iter()
                .filter(|at| now.saturating_duration_since(**at) < *window)
                .count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop timestamps that are not newer than `now - window`
    pub fn prune(&mut self, now: Instant) {
        if let FailureLedger::Windowed { window, failures } = self {
            while let Some(oldest) = failures.front() {
                if now.saturating_duration_since(*oldest) < *window {
                    break;
                }
                failures.pop_front();
            }
        }
    }
}
