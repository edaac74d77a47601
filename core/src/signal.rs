//! Cancellation signals
//!
//! A [`Signal`] pairs a `CancellationToken` with an optional deadline. The
//! breaker races protected work against the signal it is given, or against
//! a timeout-derived child when the caller's signal has no deadline.

use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Why a signal fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fired {
    Cancelled,
    DeadlineExceeded,
}

/// Cancellation token with an optional deadline
#[derive(Debug, Clone, Default)]
pub struct Signal {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Signal {
    /// A signal that only fires when cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token; cancelling the token fires the signal
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// A signal whose deadline is `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Child signal with a deadline `timeout` from now
    ///
    /// Cancelling `self` cancels the child; cancelling the child leaves
    /// `self` untouched.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the signal has fired, either way
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Completes when the signal fires
    pub async fn fired(&self) -> Fired {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => Fired::Cancelled,
                _ = sleep_until(deadline) => Fired::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                Fired::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires() {
        let signal = Signal::with_timeout(Duration::from_millis(200));

        assert!(!signal.is_done());
        assert_eq!(signal.fired().await, Fired::DeadlineExceeded);
        assert!(signal.is_done());
        assert!(!signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_beats_deadline() {
        let signal = Signal::with_timeout(Duration::from_secs(60));
        let canceller = signal.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        assert_eq!(signal.fired().await, Fired::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_follows_parent_cancellation() {
        let parent = Signal::new();
        let child = parent.child_with_timeout(Duration::from_secs(5));

        assert!(parent.deadline().is_none());
        assert!(child.deadline().is_some());

        parent.cancel();
        assert_eq!(child.fired().await, Fired::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_cancel_does_not_reach_parent() {
        let parent = Signal::new();
        let child = parent.child_with_timeout(Duration::from_secs(5));

        child.cancel();

        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_signal_without_deadline() {
        let token = CancellationToken::new();
        let signal = Signal::from_token(token.clone());

        token.cancel();

        assert_eq!(signal.fired().await, Fired::Cancelled);
        assert!(signal.is_done());
    }
}
