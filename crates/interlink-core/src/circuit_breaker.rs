//! Circuit breaker guarding calls to a single peer
//!
//! Closed until `failure_threshold` consecutive failures, then open: calls are
//! refused without touching the network. Once `reset_timeout` has elapsed since
//! the last failure, exactly one probe call is let through and the failure
//! count starts again from zero. A successful probe closes the breaker; a
//! failed one counts as a single failure, so the breaker only re-opens once the
//! threshold is reached again.

use std::{fmt, future::Future, time::Duration};

use interlink_types::error::{Error, Result};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are refused
    Open,
    /// Reset timeout elapsed; the next call (or the one in flight) is a probe
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    last_failure: Option<Instant>,
    is_open: bool,
    probe_in_flight: bool,
}

impl BreakerState {
    fn timeout_elapsed(&self, reset_timeout: Duration) -> bool {
        self.last_failure.is_some_and(|at| at.elapsed() > reset_timeout)
    }
}

/// Failure-tracking state machine shared by every call a client makes
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    state: Mutex<BreakerState>,
}

/// Admission to run one guarded call
///
/// Report the outcome with [`Permit::success`] or [`Permit::failure`]. A probe
/// permit dropped without an outcome (e.g., the caller was cancelled) gives the
/// probe slot back so the next call can try.
#[must_use = "report the call outcome through the permit"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl Permit<'_> {
    /// Whether this call is the half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.state.lock().probe_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(name: impl Into<String>, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Name of the guarded dependency
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        let state = self.state.lock();
        if !state.is_open {
            CircuitState::Closed
        } else if state.probe_in_flight || state.timeout_elapsed(self.reset_timeout) {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    /// Consecutive failures recorded so far
    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    /// Ask to run a call
    ///
    /// # Errors
    ///
    /// Returns `Error::CircuitOpen` while the breaker is open, and while a
    /// half-open probe is already in flight.
    pub fn try_acquire(&self) -> Result<Permit<'_>> {
        let mut state = self.state.lock();

        if !state.is_open {
            return Ok(Permit { breaker: self, probe: false, settled: false });
        }

        if !state.probe_in_flight && state.timeout_elapsed(self.reset_timeout) {
            state.probe_in_flight = true;
            state.failure_count = 0;
            debug!(breaker = %self.name, "Reset timeout elapsed, allowing probe call");
            return Ok(Permit { breaker: self, probe: true, settled: false });
        }

        Err(Error::CircuitOpen(self.name.clone()))
    }

    /// Record a successful call, closing the breaker
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if state.is_open {
            info!(breaker = %self.name, "Probe succeeded, circuit breaker closed");
        }
        *state = BreakerState::default();
    }

    /// Record a failed call
    ///
    /// Returns true if this failure left the breaker open.
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock();
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure = Some(Instant::now());
        let was_probe = std::mem::take(&mut state.probe_in_flight);
        let was_open = state.is_open;
        state.is_open = state.failure_count >= self.failure_threshold;

        match (was_open, state.is_open) {
            (false, true) => warn!(
                breaker = %self.name,
                failure_count = state.failure_count,
                "Circuit breaker opened"
            ),
            (true, true) if was_probe => {
                warn!(breaker = %self.name, "Probe failed, circuit breaker re-opened")
            },
            (true, false) => info!(
                breaker = %self.name,
                failure_count = state.failure_count,
                "Probe failed below threshold, circuit breaker closed"
            ),
            _ => debug!(
                breaker = %self.name,
                failure_count = state.failure_count,
                "Call failed"
            ),
        }

        state.is_open
    }

    /// Run `call` under the breaker
    ///
    /// The breaker is consulted once, before `call` starts; its outcome is
    /// recorded once, after it finishes.
    pub async fn call<F, T>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let permit = self.try_acquire()?;

        match call.await {
            Ok(value) => {
                permit.success();
                Ok(value)
            },
            Err(e) => {
                permit.failure();
                Err(e)
            },
        }
    }
}
