//! Error types for circuit breaker operations

use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Errors returned from a protected call
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Breaker is open, the work was not run
    Open {
        breaker: String,
        /// Time left before the breaker admits a probe
        retry_after: Duration,
    },
    /// The effective deadline passed before the work finished
    DeadlineExceeded { breaker: String, elapsed: Duration },
    /// The caller's signal was cancelled before the work finished
    Cancelled { breaker: String },
    /// The error returned by the work, unmodified
    Execution(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, BreakerError::DeadlineExceeded { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BreakerError::Cancelled { .. })
    }

    /// The work's own error, if that is what ended the call
    pub fn execution(&self) -> Option<&E> {
        match self {
            BreakerError::Execution(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_execution(self) -> Option<E> {
        match self {
            BreakerError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open {
                breaker,
                retry_after,
            } => {
                write!(
                    f,
                    "Circuit '{}' is open (retry after {:?})",
                    breaker, retry_after
                )
            }
            BreakerError::DeadlineExceeded { breaker, elapsed } => {
                write!(
                    f,
                    "Circuit '{}' deadline exceeded after {:?}",
                    breaker, elapsed
                )
            }
            BreakerError::Cancelled { breaker } => {
                write!(f, "Circuit '{}' call cancelled", breaker)
            }
            BreakerError::Execution(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl<E: Error + 'static> Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BreakerError::Execution(e) => Some(e),
            _ => None,
        }
    }
}
