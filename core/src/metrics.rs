//! Metrics sinks
//!
//! The breaker reports every outcome and transition to a [`MetricsSink`].
//! When no sink is configured it reports to [`NullMetrics`], so call sites
//! never branch on the sink's presence.

use crate::state::{Outcome, State};
use std::fmt;
use std::time::Duration;

/// Receiver of breaker outcome and transition events
///
/// Every method defaults to a no-op. Implementations are called from any
/// number of tasks concurrently; transition events arrive while the breaker
/// lock is held.
pub trait MetricsSink: Send + Sync + fmt::Debug {
    fn observe_success(&self, _state: State, _duration: Duration) {}

    fn observe_error(&self, _state: State, _duration: Duration) {}

    fn observe_timeout(&self, _state: State, _duration: Duration) {}

    fn observe_blocked(&self, _state: State) {}

    fn observe_ignored(&self, _state: State, _duration: Duration) {}

    /// Current-state gauge
    fn set_state(&self, _state: State) {}

    /// Called only for real transitions
    fn record_transition(&self, _from: State, _to: State) {}
}

/// No-op sink
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {}

/// Sink reporting through the `metrics` facade
///
/// Metric names are prefixed with the given subsystem:
/// - `<prefix>_requests_total{status, state}`
/// - `<prefix>_execution_duration_seconds{status}`
/// - `<prefix>_state{state}`
/// - `<prefix>_state_transitions_total{from, to}`
///
/// Nothing is exported unless a recorder is installed.
#[derive(Debug, Clone)]
pub struct RecorderMetrics {
    requests_total: String,
    duration_seconds: String,
    state_gauge: String,
    transitions_total: String,
}

impl RecorderMetrics {
    pub fn new(subsystem: &str) -> Self {
        let sink = Self {
            requests_total: format!("{subsystem}_requests_total"),
            duration_seconds: format!("{subsystem}_execution_duration_seconds"),
            state_gauge: format!("{subsystem}_state"),
            transitions_total: format!("{subsystem}_state_transitions_total"),
        };

        ::metrics::describe_counter!(
            sink.requests_total.clone(),
            "Total number of requests through the circuit breaker"
        );
        ::metrics::describe_histogram!(
            sink.duration_seconds.clone(),
            ::metrics::Unit::Seconds,
            "Execution duration of requests"
        );
        ::metrics::describe_gauge!(
            sink.state_gauge.clone(),
            "Current state of the circuit breaker"
        );
        ::metrics::describe_counter!(
            sink.transitions_total.clone(),
            "Total number of circuit breaker state transitions"
        );

        sink
    }

    fn count(&self, outcome: Outcome, state: State) {
        ::metrics::counter!(
            self.requests_total.clone(),
            "status" => outcome.as_str(),
            "state" => state.as_str()
        )
        .increment(1);
    }

    fn observe(&self, outcome: Outcome, state: State, duration: Duration) {
        self.count(outcome, state);
        ::metrics::histogram!(self.duration_seconds.clone(), "status" => outcome.as_str())
            .record(duration.as_secs_f64());
    }
}

impl MetricsSink for RecorderMetrics {
    fn observe_success(&self, state: State, duration: Duration) {
        self.observe(Outcome::Success, state, duration);
    }

    fn observe_error(&self, state: State, duration: Duration) {
        self.observe(Outcome::Error, state, duration);
    }

    fn observe_timeout(&self, state: State, duration: Duration) {
        self.observe(Outcome::Timeout, state, duration);
    }

    fn observe_blocked(&self, state: State) {
        self.count(Outcome::Blocked, state);
    }

    fn observe_ignored(&self, state: State, duration: Duration) {
        self.observe(Outcome::Ignored, state, duration);
    }

    fn set_state(&self, state: State) {
        for candidate in State::ALL {
            let value = if candidate == state { 1.0 } else { 0.0 };
            ::metrics::gauge!(self.state_gauge.clone(), "state" => candidate.as_str()).set(value);
        }
    }

    fn record_transition(&self, from: State, to: State) {
        if from == to {
            return;
        }
        ::metrics::counter!(
            self.transitions_total.clone(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Event captured by [`RecordingMetrics`]
    #[derive(Debug, Clone, PartialEq)]
    pub enum Recorded {
        Observed(Outcome, State),
        StateSet(State),
        Transition(State, State),
    }

    /// In-memory sink for assertions
    #[derive(Debug, Default)]
    pub struct RecordingMetrics {
        events: Mutex<Vec<Recorded>>,
    }

    impl RecordingMetrics {
        pub fn events(&self) -> Vec<Recorded> {
            self.events.lock().unwrap().clone()
        }

        pub fn count(&self, outcome: Outcome) -> usize {
            self.events()
                .iter()
                .filter(|e| matches!(e, Recorded::Observed(o, _) if *o == outcome))
                .count()
        }

        pub fn transitions(&self) -> Vec<(State, State)> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Recorded::Transition(from, to) => Some((from, to)),
                    _ => None,
                })
                .collect()
        }

        fn push(&self, event: Recorded) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl MetricsSink for RecordingMetrics {
        fn observe_success(&self, state: State, _duration: Duration) {
            self.push(Recorded::Observed(Outcome::Success, state));
        }

        fn observe_error(&self, state: State, _duration: Duration) {
            self.push(Recorded::Observed(Outcome::Error, state));
        }

        fn observe_timeout(&self, state: State, _duration: Duration) {
            self.push(Recorded::Observed(Outcome::Timeout, state));
        }

        fn observe_blocked(&self, state: State) {
            self.push(Recorded::Observed(Outcome::Blocked, state));
        }

        fn observe_ignored(&self, state: State, _duration: Duration) {
            self.push(Recorded::Observed(Outcome::Ignored, state));
        }

        fn set_state(&self, state: State) {
            self.push(Recorded::StateSet(state));
        }

        fn record_transition(&self, from: State, to: State) {
            if from != to {
                self.push(Recorded::Transition(from, to));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Recorded, RecordingMetrics};
    use super::*;

    #[test]
    fn test_null_metrics_accepts_everything() {
        let sink = NullMetrics;

        sink.observe_success(State::Closed, Duration::from_millis(1));
        sink.observe_blocked(State::Open);
        sink.set_state(State::HalfOpen);
        sink.record_transition(State::Open, State::HalfOpen);
    }

    #[test]
    fn test_recorder_metrics_without_recorder() {
        // No global recorder installed: every call is a no-op
        let sink = RecorderMetrics::new("payments");

        sink.observe_error(State::Closed, Duration::from_millis(3));
        sink.observe_ignored(State::Closed, Duration::from_millis(3));
        sink.set_state(State::Open);
        sink.record_transition(State::Closed, State::Open);
        assert_eq!(sink.requests_total, "payments_requests_total");
        assert_eq!(sink.transitions_total, "payments_state_transitions_total");
    }

    #[test]
    fn test_recording_sink_skips_self_transitions() {
        let sink = RecordingMetrics::default();

        sink.record_transition(State::Closed, State::Closed);
        sink.record_transition(State::Closed, State::Open);

        assert_eq!(sink.events(), vec![Recorded::Transition(State::Closed, State::Open)]);
    }
}
