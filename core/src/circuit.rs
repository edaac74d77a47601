//! Circuit breaker implementation using state machines
//!
//! Every breaker owns one lock guarding the state machine, the failure
//! ledger and the last failure time. Protected work runs in its own tokio
//! task and is raced against the effective signal; the lock is only taken
//! for admission and for outcome handling, never across an await.

use crate::{
    builder::CircuitBuilder,
    callbacks::Callbacks,
    classifier::{FailureClassifier, FailureContext, StatusExtractor},
    config::{Config, ConfigError},
    errors::BreakerError,
    ledger::FailureLedger,
    metrics::MetricsSink,
    signal::{Fired, Signal},
    state::State,
};
use state_machines::state_machine;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Resolution of the jitter draw
const JITTER_SCALE_MS: u64 = 1_000_000;

/// Circuit breaker context - shared data across all states
#[derive(Debug, Clone, Default)]
pub struct CircuitContext {
    pub name: String,
    pub config: Config,
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    /// Time of the most recent qualifying failure
    pub opened_at: Option<Instant>,
    /// How long to stay open, drawn once per trip
    pub dwell: Duration,
}

/// Data specific to the HalfOpen state
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    /// Probes admitted since entering HalfOpen
    pub probes: usize,
}

// Define the circuit breaker state machine with dynamic mode
state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,  // Enable dynamic mode for runtime state transitions

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
    ],
    events {
        trip {
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            guards: [dwell_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

impl Circuit<Open> {
    /// Check if the dwell time has passed since the last failure
    fn dwell_elapsed(&self, _ctx: &CircuitContext) -> bool {
        self.state_data_open()
            .and_then(|data| data.opened_at.map(|at| at.elapsed() >= data.dwell))
            .unwrap_or(true)
    }
}

/// Point-in-time view of a breaker, taken under its lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub state: State,
    /// Failures currently counting toward the threshold
    pub failures: usize,
    pub last_failure_at: Option<Instant>,
    /// Probes admitted in the current HalfOpen period, 0 otherwise
    pub half_open_probes: usize,
}

/// Everything guarded by the breaker lock
struct Shared {
    machine: DynamicCircuit,
    ledger: FailureLedger,
    last_failure_at: Option<Instant>,
}

impl Shared {
    fn state(&self) -> State {
        State::from_machine(self.machine.current_state())
    }
}

struct Inner {
    context: CircuitContext,
    shared: Mutex<Shared>,
    classifier: Arc<dyn FailureClassifier>,
    status_code: StatusExtractor,
    metrics: Arc<dyn MetricsSink>,
    callbacks: Callbacks,
}

/// Circuit breaker public API
///
/// Cloning is cheap and every clone drives the same breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
}

impl CircuitBreaker {
    /// Create a breaker from a validated config (use builder() for more options)
    pub fn new(name: impl Into<String>, config: Config) -> Result<Self, ConfigError> {
        CircuitBuilder::new(name).config(config).build()
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> CircuitBuilder {
        CircuitBuilder::new(name)
    }

    pub(crate) fn from_parts(
        context: CircuitContext,
        classifier: Arc<dyn FailureClassifier>,
        status_code: StatusExtractor,
        metrics: Arc<dyn MetricsSink>,
        callbacks: Callbacks,
    ) -> Result<Self, ConfigError> {
        context.config.validate()?;

        let shared = Shared {
            machine: DynamicCircuit::new(context.clone()),
            ledger: FailureLedger::new(context.config.window_size),
            last_failure_at: None,
        };
        metrics.set_state(State::Closed);

        Ok(Self {
            inner: Arc::new(Inner {
                context,
                shared: Mutex::new(shared),
                classifier,
                status_code,
                metrics,
                callbacks,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.context.name
    }

    pub fn config(&self) -> &Config {
        &self.inner.context.config
    }

    /// Current state
    pub fn state(&self) -> State {
        self.inner.lock().state()
    }

    /// Failures currently counting toward the threshold
    pub fn failure_count(&self) -> usize {
        self.inner.lock().ledger.count(Instant::now())
    }

    pub fn snapshot(&self) -> Snapshot {
        let shared = self.inner.lock();
        Snapshot {
            state: shared.state(),
            failures: shared.ledger.count(Instant::now()),
            last_failure_at: shared.last_failure_at,
            half_open_probes: shared.machine.half_open_data().map_or(0, |d| d.probes),
        }
    }

    /// Run `work` under breaker protection
    ///
    /// The future returned by `work` is spawned onto the tokio runtime and
    /// raced against the configured execution timeout. When the timeout wins
    /// the task is left running and its eventual result is discarded.
    ///
    /// A panic, whether in `work` itself or in its future, counts as a
    /// failure and is then resumed on the caller.
    pub async fn execute<F, Fut, T, E>(&self, work: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let admitted = self.inner.admit::<E>()?;
        let (signal, derived) = self.inner.effective_signal(Signal::new());
        let started = Instant::now();
        let task = tokio::spawn(self.inner.start(admitted, started, work));
        self.inner
            .race(admitted, started, signal, derived, task)
            .await
    }

    /// Run `work` under breaker protection, honouring the caller's signal
    ///
    /// If `signal` carries a deadline it is used as is. Otherwise a child
    /// signal bounded by the execution timeout (when configured) is derived
    /// and cancelled once the call is decided. `work` receives the effective
    /// signal so it can stop cooperatively.
    pub async fn execute_with_signal<F, Fut, T, E>(
        &self,
        signal: Signal,
        work: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce(Signal) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let admitted = self.inner.admit::<E>()?;
        let (signal, derived) = self.inner.effective_signal(signal);
        let started = Instant::now();
        let task = tokio::spawn(self.inner.start(admitted, started, || work(signal.clone())));
        self.inner
            .race(admitted, started, signal, derived, task)
            .await
    }

    /// Run a blocking closure on tokio's blocking pool under breaker protection
    pub async fn execute_blocking<F, T, E>(&self, work: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let admitted = self.inner.admit::<E>()?;
        let (signal, derived) = self.inner.effective_signal(Signal::new());
        let started = Instant::now();
        let task = tokio::task::spawn_blocking(work);
        self.inner
            .race(admitted, started, signal, derived, task)
            .await
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.inner.context.name)
            .field("config", &self.inner.context.config)
            .field("state", &self.state())
            .field("classifier", &self.inner.classifier)
            .field("metrics", &self.inner.metrics)
            .field("callbacks", &self.inner.callbacks)
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admission check; returns the state the call runs in
    fn admit<E>(&self) -> Result<State, BreakerError<E>> {
        let mut shared = self.lock();

        if shared.state() == State::Open && !self.attempt_reset(&mut shared) {
            let retry_after = shared
                .machine
                .open_data()
                .and_then(|d| d.opened_at.map(|at| d.dwell.saturating_sub(at.elapsed())))
                .unwrap_or_default();
            drop(shared);

            self.metrics.observe_blocked(State::Open);
            debug!(breaker = %self.context.name, ?retry_after, "call rejected, circuit open");
            return Err(BreakerError::Open {
                breaker: self.context.name.clone(),
                retry_after,
            });
        }

        if let Some(data) = shared.machine.half_open_data_mut() {
            data.probes += 1;
        }
        Ok(shared.state())
    }

    /// The caller's deadline wins; otherwise bound the call by the execution timeout
    fn effective_signal(&self, signal: Signal) -> (Signal, bool) {
        match self.context.config.execution_timeout {
            Some(timeout) if signal.deadline().is_none() => {
                (signal.child_with_timeout(timeout), true)
            }
            _ => (signal, false),
        }
    }

    /// Call `work` to get the future to spawn; a panic here counts like one inside the task
    fn start<W, Fut>(self: &Arc<Self>, admitted: State, started: Instant, work: W) -> Fut
    where
        W: FnOnce() -> Fut,
    {
        match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(future) => future,
            Err(payload) => {
                self.on_panicked(admitted, started.elapsed());
                panic::resume_unwind(payload)
            }
        }
    }

    async fn race<T, E>(
        self: &Arc<Self>,
        admitted: State,
        started: Instant,
        signal: Signal,
        derived: bool,
        task: JoinHandle<Result<T, E>>,
    ) -> Result<T, BreakerError<E>>
    where
        E: 'static,
    {
        // Dropping the losing JoinHandle detaches the task, it is not aborted
        let finished = tokio::select! {
            fired = signal.fired() => Err(fired),
            joined = task => Ok(joined),
        };
        if derived {
            signal.cancel();
        }
        let elapsed = started.elapsed();

        match finished {
            Err(fired) => Err(self.on_interrupted(admitted, fired, elapsed)),
            Ok(Ok(Ok(value))) => {
                self.on_success(admitted, elapsed);
                Ok(value)
            }
            Ok(Ok(Err(err))) => Err(self.on_error(admitted, err, elapsed)),
            Ok(Err(join_error)) => {
                if join_error.is_panic() {
                    self.on_panicked(admitted, elapsed);
                    panic::resume_unwind(join_error.into_panic());
                }
                self.record_qualifying_failure();
                self.metrics.observe_error(admitted, elapsed);
                warn!(breaker = %self.context.name, "protected task cancelled by the runtime");
                Err(BreakerError::Cancelled {
                    breaker: self.context.name.clone(),
                })
            }
        }
    }

    fn on_panicked(self: &Arc<Self>, admitted: State, elapsed: Duration) {
        self.record_qualifying_failure();
        self.metrics.observe_error(admitted, elapsed);
        warn!(breaker = %self.context.name, ?elapsed, "protected work panicked");
    }

    fn on_interrupted<E>(
        self: &Arc<Self>,
        admitted: State,
        fired: Fired,
        elapsed: Duration,
    ) -> BreakerError<E> {
        self.record_qualifying_failure();
        self.metrics.observe_timeout(admitted, elapsed);
        debug!(breaker = %self.context.name, ?fired, ?elapsed, "protected call interrupted");

        let breaker = self.context.name.clone();
        match fired {
            Fired::DeadlineExceeded => BreakerError::DeadlineExceeded { breaker, elapsed },
            Fired::Cancelled => BreakerError::Cancelled { breaker },
        }
    }

    fn on_success(&self, admitted: State, elapsed: Duration) {
        {
            let mut shared = self.lock();
            match shared.state() {
                State::Closed => shared.ledger.clear(),
                State::HalfOpen => {
                    shared.ledger.clear();
                    if shared.machine.handle(CircuitEvent::Close).is_ok() {
                        self.report_transition(State::HalfOpen, State::Closed);
                    }
                }
                // Admitted before the trip; Open never moves straight to Closed
                State::Open => {
                    trace!(breaker = %self.context.name, "late success while open");
                }
            }
        }
        self.metrics.observe_success(admitted, elapsed);
    }

    fn on_error<E>(self: &Arc<Self>, admitted: State, err: E, elapsed: Duration) -> BreakerError<E>
    where
        E: 'static,
    {
        let error: &dyn Any = &err;
        let status_code = (self.status_code)(error);
        let qualifies = self.classifier.is_failure(&FailureContext {
            breaker_name: &self.context.name,
            error,
            status_code,
            duration: elapsed,
        });

        if qualifies {
            self.record_qualifying_failure();
            self.metrics.observe_error(admitted, elapsed);
        } else {
            self.metrics.observe_ignored(admitted, elapsed);
            debug!(
                breaker = %self.context.name,
                ?status_code,
                "error ignored by classifier"
            );
        }
        BreakerError::Execution(err)
    }

    /// Count one failure and open the breaker if it must
    fn record_qualifying_failure(self: &Arc<Self>) {
        let now = Instant::now();
        let threshold = self.context.config.failure_threshold as usize;

        let mut shared = self.lock();
        shared.ledger.record_failure(now);
        shared.last_failure_at = Some(now);

        let dwell = match shared.state() {
            State::Closed if !shared.ledger.should_trip(now, threshold) => None,
            State::Closed | State::HalfOpen => self.trip(&mut shared, now),
            // A call admitted before the trip failed late: restart the dwell
            State::Open => shared.machine.open_data_mut().map(|data| {
                data.opened_at = Some(now);
                data.dwell
            }),
        };
        drop(shared);

        if let Some(dwell) = dwell {
            self.arm_reset_timer(dwell);
        }
    }

    fn trip(&self, shared: &mut Shared, now: Instant) -> Option<Duration> {
        let from = shared.state();
        if shared.machine.handle(CircuitEvent::Trip).is_err() {
            return None;
        }

        let dwell = self.dwell();
        if let Some(data) = shared.machine.open_data_mut() {
            data.opened_at = Some(now);
            data.dwell = dwell;
        }
        self.report_transition(from, State::Open);
        Some(dwell)
    }

    /// Open -> HalfOpen if the dwell time has passed; the probe starts clean
    fn attempt_reset(&self, shared: &mut Shared) -> bool {
        if shared.machine.handle(CircuitEvent::AttemptReset).is_err() {
            return false;
        }
        shared.ledger.clear();
        self.report_transition(State::Open, State::HalfOpen);
        true
    }

    /// Reset timeout for this trip, with jitter when configured
    fn dwell(&self) -> Duration {
        let config = &self.context.config;
        if config.jitter_factor > 0.0 {
            // Ratio drawn on a fixed scale; the full timeout is scaled, never truncated to ms
            let policy = chrono_machines::Policy {
                max_attempts: 1,
                base_delay_ms: JITTER_SCALE_MS,
                multiplier: 1.0,
                max_delay_ms: JITTER_SCALE_MS,
            };
            let ratio = policy.calculate_delay(1, config.jitter_factor) as f64 / JITTER_SCALE_MS as f64;
            config.reset_timeout.mul_f64(ratio.clamp(1.0 - config.jitter_factor, 1.0))
        } else {
            config.reset_timeout
        }
    }

    /// Spawn a timer that moves the breaker to HalfOpen after `dwell`
    ///
    /// Superseded timers are not cancelled; the dwell guard turns them into no-ops.
    fn arm_reset_timer(self: &Arc<Self>, dwell: Duration) {
        let breaker = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(dwell).await;
            if let Some(inner) = breaker.upgrade() {
                inner.reset_timer_fired();
            }
        });
    }

    fn reset_timer_fired(&self) {
        let mut shared = self.lock();
        if shared.state() != State::Open {
            trace!(breaker = %self.context.name, "reset timer fired, circuit no longer open");
            return;
        }
        if !self.attempt_reset(&mut shared) {
            trace!(breaker = %self.context.name, "reset timer superseded by a later failure");
        }
    }

    /// Report a transition; the caller holds the lock
    fn report_transition(&self, from: State, to: State) {
        self.metrics.record_transition(from, to);
        self.metrics.set_state(to);
        self.callbacks.trigger(to, &self.context.name);

        match to {
            State::Open => warn!(breaker = %self.context.name, %from, "circuit opened"),
            _ => info!(breaker = %self.context.name, %from, %to, "circuit state changed"),
        }
    }
}
