//! Callback system for circuit breaker state transitions

use crate::state::State;
use std::sync::Arc;

type Hook = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks for circuit breaker events
///
/// Hooks receive the breaker name. They run while the breaker lock is held
/// and must not call back into the breaker.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<Hook>,
    pub on_close: Option<Hook>,
    pub on_half_open: Option<Hook>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the hook registered for entering `state`
    pub fn trigger(&self, state: State, breaker: &str) {
        let hook = match state {
            State::Open => &self.on_open,
            State::Closed => &self.on_close,
            State::HalfOpen => &self.on_half_open,
        };
        if let Some(callback) = hook {
            callback(breaker);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}
