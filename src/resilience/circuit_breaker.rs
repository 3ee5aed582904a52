//! Three-state circuit breaker.
//!
//! ```text
//! Closed --(failures >= threshold)--> Open --(reset_timeout elapsed)--> HalfOpen
//!   ^                                   ^                                  |
//!   |                                   +---------(trial fails)------------+
//!   +------------------------------(trial succeeds)------------------------+
//! ```
//!
//! Callers ask [`CircuitBreaker::is_closed_or_half_open`] before calling the
//! guarded operation, then report exactly one of
//! [`record_success`](CircuitBreaker::record_success) or
//! [`record_failure`](CircuitBreaker::record_failure). While half-open only
//! one trial call is admitted; other callers are rejected until it reports back.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::telemetry;

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit. Default: 5.
    pub failure_threshold: u32,
    /// Cool-down before a trial call is allowed. Default: 30s.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl BreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    changed_at: Instant,
    trial_in_flight: bool,
}

impl BreakerState {
    fn transition(&mut self, to: CircuitState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        self.changed_at = Instant::now();
        self.trial_in_flight = false;
        if to == CircuitState::Closed {
            self.failures = 0;
        }
        metrics::counter!(telemetry::CIRCUIT_TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        match to {
            CircuitState::Open => warn!(%from, failures = self.failures, "circuit opened"),
            _ => info!(%from, %to, "circuit state changed"),
        }
    }
}

/// Failure-isolation gate for a downstream call.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                changed_at: Instant::now(),
                trial_in_flight: false,
            }),
        }
    }

    /// Whether a call may proceed.
    ///
    /// An open circuit whose cool-down has elapsed moves to half-open and
    /// admits the caller as its single trial call.
    pub fn is_closed_or_half_open(&self) -> bool {
        self.admit().is_some()
    }

    /// Admit a call, returning whether it is the half-open trial call.
    ///
    /// `None` means the call must not proceed.
    pub fn admit(&self) -> Option<bool> {
        let mut s = self.state.lock();
        match s.state {
            CircuitState::Closed => Some(false),
            CircuitState::Open => {
                if s.changed_at.elapsed() < self.config.reset_timeout {
                    return None;
                }
                s.transition(CircuitState::HalfOpen);
                s.trial_in_flight = true;
                Some(true)
            }
            CircuitState::HalfOpen => {
                if s.trial_in_flight {
                    None
                } else {
                    s.trial_in_flight = true;
                    Some(true)
                }
            }
        }
    }

    /// Give up an admitted trial call without reporting an outcome.
    ///
    /// The circuit stays half-open and the next caller becomes the trial call.
    /// No-op unless a trial call is outstanding.
    pub fn release_trial(&self) {
        let mut s = self.state.lock();
        if s.state == CircuitState::HalfOpen {
            s.trial_in_flight = false;
        }
    }

    /// Report a successful call. Closes a half-open circuit.
    pub fn record_success(&self) {
        let mut s = self.state.lock();
        match s.state {
            CircuitState::HalfOpen => s.transition(CircuitState::Closed),
            CircuitState::Closed => s.failures = 0,
            CircuitState::Open => {}
        }
    }

    /// Report a failed call.
    ///
    /// Counts towards the threshold while closed; re-opens a half-open
    /// circuit and restarts the cool-down.
    pub fn record_failure(&self) {
        let mut s = self.state.lock();
        match s.state {
            CircuitState::Closed => {
                s.failures = s.failures.saturating_add(1);
                if s.failures >= self.config.failure_threshold {
                    s.transition(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                s.failures = s.failures.saturating_add(1);
                s.transition(CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Current state, without triggering the open to half-open move.
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Failures counted since the circuit last closed.
    pub fn failure_count(&self) -> u32 {
        self.state.lock().failures
    }

    /// Force the circuit closed.
    pub fn reset(&self) {
        let mut s = self.state.lock();
        s.transition(CircuitState::Closed);
        s.failures = 0;
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }
}
