//! breakr - async circuit breaker built on a state machine
//!
//! This crate provides a circuit breaker with:
//! - A typed state machine for the breaker lifecycle (Closed → Open → HalfOpen)
//! - Failure counting, optionally limited to a trailing time window
//! - Protected calls raced against an execution timeout or a caller's signal
//! - A reset timer that moves an open breaker to half-open on its own
//! - Status-code filtering of which errors count as failures
//! - Pluggable metrics sinks and transition callbacks
//!
//! # Example
//!
//! ```rust
//! use breakr::{CircuitBreaker, State};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let breaker = CircuitBreaker::builder("my_service")
//!     .failure_threshold(5)
//!     .reset_timeout(Duration::from_secs(30))
//!     .execution_timeout(Duration::from_secs(2))
//!     .on_open(|name| println!("Circuit {} opened!", name))
//!     .build()
//!     .expect("valid config");
//!
//! // Execute with circuit protection
//! let result = breaker
//!     .execute(|| async {
//!         // Your service call here
//!         Ok::<_, String>("success")
//!     })
//!     .await;
//! assert_eq!(result.unwrap(), "success");
//!
//! // Check circuit state
//! if breaker.state() == State::Open {
//!     println!("Circuit is open, skipping call");
//! }
//! # }
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod ledger;
pub mod metrics;
pub mod signal;
pub mod state;

pub use builder::CircuitBuilder;
pub use callbacks::Callbacks;
pub use circuit::{CircuitBreaker, Snapshot};
pub use classifier::{
    CodeClassifier, CodedError, FailureClassifier, FailureContext, PredicateClassifier,
    StatusCode, StatusExtractor, default_status_code, status_code_of,
};
pub use config::{Config, ConfigError, parse_duration};
pub use errors::BreakerError;
pub use crate::metrics::{MetricsSink, NullMetrics, RecorderMetrics};
pub use signal::{Fired, Signal};
pub use state::{Outcome, State};
