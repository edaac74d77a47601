//! Builder API for ergonomic circuit breaker configuration

use crate::{
    callbacks::Callbacks,
    circuit::{CircuitBreaker, CircuitContext},
    classifier::{
        CodeClassifier, FailureClassifier, StatusCode, StatusExtractor, default_status_code,
        status_code_of,
    },
    config::{Config, ConfigError},
    metrics::{MetricsSink, NullMetrics},
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder {
    name: String,
    config: Config,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    status_code: Option<StatusExtractor>,
    metrics: Option<Arc<dyn MetricsSink>>,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            failure_classifier: None,
            status_code: None,
            metrics: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Replace the whole configuration, e.g. one loaded from a file
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the number of qualifying failures that opens the circuit
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set how long the circuit stays open before admitting a probe
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    /// Bound every protected call that does not bring its own deadline
    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.config.execution_timeout = Some(timeout);
        self
    }

    /// Only count failures within this trailing window (zero disables the window)
    pub fn window_size(mut self, window: Duration) -> Self {
        self.config.window_size = window;
        self
    }

    /// Only errors carrying one of these status codes count as failures
    ///
    /// Ignored when a custom classifier is set with [`failure_classifier`](Self::failure_classifier).
    pub fn failure_codes(mut self, codes: impl IntoIterator<Item = i64>) -> Self {
        self.config.failure_codes = codes.into_iter().collect();
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: timeout * (1 - jitter + rand * jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    /// Set a failure classifier to filter which errors should trip the circuit
    ///
    /// Timeouts and cancellations always count; the classifier only sees
    /// errors returned by the work itself.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use breakr::{CircuitBreaker, PredicateClassifier};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let breaker = CircuitBreaker::builder("api")
    ///     .failure_classifier(Arc::new(PredicateClassifier::new(|ctx| {
    ///         // Only trip on slow errors
    ///         ctx.duration > Duration::from_secs(1)
    ///     })))
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    /// Read status codes from the work's error type `E` through its [`StatusCode`] impl
    ///
    /// Errors of other types still go through [`default_status_code`].
    ///
    /// ```rust
    /// use breakr::{CircuitBreaker, StatusCode};
    ///
    /// #[derive(Debug)]
    /// struct HttpError(u16);
    ///
    /// impl StatusCode for HttpError {
    ///     fn status_code(&self) -> Option<i64> {
    ///         Some(i64::from(self.0))
    ///     }
    /// }
    ///
    /// let breaker = CircuitBreaker::builder("api")
    ///     .failure_codes([500, 503])
    ///     .status_code_of::<HttpError>()
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn status_code_of<E: StatusCode + 'static>(mut self) -> Self {
        self.status_code = Some(status_code_of::<E>());
        self
    }

    /// Set a custom status-code extractor for type-erased work errors
    pub fn status_code_extractor(mut self, extractor: StatusExtractor) -> Self {
        self.status_code = Some(extractor);
        self
    }

    /// Report outcomes and transitions to `sink`
    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Validate the configuration and build the circuit breaker
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        let classifier = self.failure_classifier.unwrap_or_else(|| {
            Arc::new(CodeClassifier::new(self.config.failure_codes.iter().copied()))
        });
        let status_code = self
            .status_code
            .unwrap_or_else(|| Arc::new(default_status_code));
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(NullMetrics));

        let context = CircuitContext {
            name: self.name,
            config: self.config,
        };

        CircuitBreaker::from_parts(context, classifier, status_code, metrics, self.callbacks)
    }
}
