//! Breaker states and outcome labels

use std::fmt;

/// The three states of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Calls pass through; qualifying failures are counted
    Closed,
    /// Calls are rejected without running the work
    Open,
    /// Calls pass through as recovery probes
    HalfOpen,
}

impl State {
    pub const ALL: [State; 3] = [State::Closed, State::Open, State::HalfOpen];

    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "Closed",
            State::Open => "Open",
            State::HalfOpen => "Half-Open",
        }
    }

    /// Map a state-machine state name onto [`State`]
    pub(crate) fn from_machine(name: &str) -> Self {
        match name {
            "Open" => State::Open,
            "HalfOpen" => State::HalfOpen,
            _ => State::Closed,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single protected call ended, from the breaker's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Error,
    Timeout,
    Blocked,
    Ignored,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
            Outcome::Timeout => "timeout",
            Outcome::Blocked => "blocked",
            Outcome::Ignored => "ignored_error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
