//! Failure classification
//!
//! Decides whether an error returned by the protected work counts against
//! the trip threshold. Timeouts and cancellations never reach a classifier:
//! they always count.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Optional status-code capability of an error type
///
/// The breaker sees work errors type-erased, so a type's codes are only
/// used once it is registered with
/// [`CircuitBuilder::status_code_of`](crate::CircuitBuilder::status_code_of).
/// Error types without a code need nothing at all.
///
/// ```rust
/// use breakr::StatusCode;
///
/// #[derive(Debug)]
/// enum ApiError {
///     Http(u16),
///     Decode,
/// }
///
/// impl StatusCode for ApiError {
///     fn status_code(&self) -> Option<i64> {
///         match self {
///             ApiError::Http(code) => Some(i64::from(*code)),
///             ApiError::Decode => None,
///         }
///     }
/// }
/// ```
pub trait StatusCode {
    fn status_code(&self) -> Option<i64> {
        None
    }
}

impl StatusCode for Box<dyn Error + Send + Sync> {
    /// Walks the source chain looking for a [`CodedError`]
    fn status_code(&self) -> Option<i64> {
        chain_status_code(&**self)
    }
}

/// Reads the status code of a type-erased work error
pub type StatusExtractor = Arc<dyn Fn(&dyn Any) -> Option<i64> + Send + Sync>;

/// Status code of the error types this crate knows about
///
/// Recognizes [`CodedError`] itself, and boxed errors or `std::io::Error`
/// wrapping one anywhere in their source chain. Anything else is opaque.
pub fn default_status_code(error: &dyn Any) -> Option<i64> {
    if let Some(coded) = error.downcast_ref::<CodedError>() {
        return Some(coded.code);
    }
    if let Some(boxed) = error.downcast_ref::<Box<dyn Error + Send + Sync>>() {
        return chain_status_code(&**boxed);
    }
    if let Some(boxed) = error.downcast_ref::<Box<dyn Error>>() {
        return chain_status_code(&**boxed);
    }
    if let Some(io) = error.downcast_ref::<std::io::Error>() {
        return io.get_ref().and_then(|inner| chain_status_code(inner));
    }
    None
}

/// Extractor using `E`'s [`StatusCode`] impl, falling back to [`default_status_code`]
pub fn status_code_of<E: StatusCode + 'static>() -> StatusExtractor {
    Arc::new(|error: &dyn Any| {
        error
            .downcast_ref::<E>()
            .map_or_else(|| default_status_code(error), |e| e.status_code())
    })
}

fn chain_status_code(root: &(dyn Error + 'static)) -> Option<i64> {
    let mut current = Some(root);
    while let Some(err) = current {
        if let Some(coded) = err.downcast_ref::<CodedError>() {
            return Some(coded.code);
        }
        current = err.source();
    }
    None
}

/// An error carrying a numeric status code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedError {
    pub code: i64,
    pub message: String,
}

impl CodedError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl Error for CodedError {}

impl StatusCode for CodedError {
    fn status_code(&self) -> Option<i64> {
        Some(self.code)
    }
}

/// Context provided to failure classifiers for error evaluation
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Breaker name
    pub breaker_name: &'a str,
    /// The error returned by the work (can be downcast to specific types)
    pub error: &'a dyn Any,
    /// The error's status code, when it exposes one
    pub status_code: Option<i64>,
    /// How long the work ran before failing
    pub duration: Duration,
}

/// Determines whether an error should count toward opening the breaker
pub trait FailureClassifier: Send + Sync + fmt::Debug {
    /// Returns `true` if the error is a qualifying failure, `false` to ignore it
    fn is_failure(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Status-code whitelist
///
/// With no codes every error qualifies. Otherwise a coded error qualifies
/// only when its code is listed, and an uncoded error always qualifies.
#[derive(Debug, Clone, Default)]
pub struct CodeClassifier {
    codes: Vec<i64>,
}

impl CodeClassifier {
    pub fn new(codes: impl IntoIterator<Item = i64>) -> Self {
        Self {
            codes: codes.into_iter().collect(),
        }
    }

    pub fn codes(&self) -> &[i64] {
        &self.codes
    }
}

impl FailureClassifier for CodeClassifier {
    fn is_failure(&self, ctx: &FailureContext<'_>) -> bool {
        if self.codes.is_empty() {
            return true;
        }

        match ctx.status_code {
            Some(code) => self.codes.contains(&code),
            None => true,
        }
    }
}

/// Predicate-based classifier using a closure
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn is_failure(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}
