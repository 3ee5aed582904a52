//! Retry configuration, delay calculation, and the retry handler.
//!
//! [`RetryHandler`] runs a fallible async operation, retrying errors that
//! [`HuginnError::is_retryable()`] classifies as transient with exponential
//! backoff. Each attempt can be bounded by its own timeout; a timed-out
//! attempt counts as a failure and is retried like any other.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::redact::redact_error;
use crate::telemetry;
use crate::{HuginnError, Result};

/// Fraction of the delay that jitter may add or remove.
const JITTER_FRACTION: f64 = 0.25;

/// Configuration for retry behaviour on transient errors.
///
/// Uses exponential backoff with optional jitter:
///
/// ```rust
/// # use huginn::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_retries(2)
///     .initial_delay(Duration::from_millis(100))
///     .backoff_factor(2.0)
///     .jitter(false);
/// assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the initial attempt. 0 = no retry. Default: 2.
    pub max_retries: u32,
    /// Delay before the first retry. Default: 1s.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt. Default: 2.
    pub backoff_factor: f64,
    /// Maximum delay between retries (caps exponential growth). Default: 30s.
    pub max_delay: Duration,
    /// Whether to randomize delays by up to ±25%. Default: true.
    pub jitter: bool,
    /// Time limit for each individual attempt. Default: 5s.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
            attempt_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set the number of retries after the initial attempt.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the exponential growth factor. `1.0` gives a fixed delay.
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Set (or clear) the per-attempt timeout.
    pub fn attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Total attempts including the initial one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after the given failed attempt (1-indexed), without jitter.
    ///
    /// `initial_delay * backoff_factor^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }

    /// Delay after the given failed attempt, with jitter if enabled.
    pub fn effective_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let mut rng = rand::thread_rng();
        let offset = delay.mul_f64(rng.gen_range(0.0..=JITTER_FRACTION));
        if rng.gen_bool(0.5) {
            delay.saturating_add(offset)
        } else {
            delay.saturating_sub(offset)
        }
    }
}

/// Outcome of [`RetryHandler::execute_with_result`].
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The successful value, if any attempt succeeded.
    pub result: Option<T>,
    /// The error from the final attempt, if none succeeded.
    pub error: Option<HuginnError>,
    /// Attempts made, including the initial one.
    pub attempts: u32,
    pub successful: bool,
}

impl<T> RetryOutcome<T> {
    /// Convert back into a `Result`, discarding the attempt count.
    pub fn into_result(self) -> Result<T> {
        match (self.result, self.error) {
            (Some(value), _) => Ok(value),
            (None, Some(err)) => Err(err),
            (None, None) => Err(HuginnError::Capability(
                "retry finished without a result".to_string(),
            )),
        }
    }
}

/// Runs async operations with retry and per-attempt timeouts.
#[derive(Debug, Clone)]
pub struct RetryHandler {
    config: RetryConfig,
    operation: &'static str,
}

impl RetryHandler {
    /// Create a handler. `operation` labels logs, metrics and timeout errors.
    pub fn new(config: RetryConfig, operation: &'static str) -> Self {
        Self { config, operation }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `f`, retrying transient errors.
    ///
    /// Permanent errors are returned immediately, unwrapped. When retries
    /// are exhausted the final error is wrapped in
    /// [`HuginnError::RetryExhausted`] with the attempt count.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (result, attempts) = self.run(f).await;
        result.map_err(|err| {
            if err.is_retryable() {
                HuginnError::RetryExhausted {
                    attempts,
                    source: Box::new(err),
                }
            } else {
                err
            }
        })
    }

    /// Run `f` like [`execute`](Self::execute) but report the outcome
    /// instead of failing.
    pub async fn execute_with_result<F, Fut, T>(&self, f: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (result, attempts) = self.run(f).await;
        match result {
            Ok(value) => RetryOutcome {
                result: Some(value),
                error: None,
                attempts,
                successful: true,
            },
            Err(err) => RetryOutcome {
                result: None,
                error: Some(err),
                attempts,
                successful: false,
            },
        }
    }

    async fn run<F, Fut, T>(&self, mut f: F) -> (Result<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.config.attempt_timeout {
                Some(after) => tokio::time::timeout(after, f())
                    .await
                    .unwrap_or(Err(HuginnError::Timeout {
                        operation: self.operation,
                        after,
                    })),
                None => f().await,
            };

            match result {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.effective_delay(attempt);
                    metrics::counter!(telemetry::RETRIES_TOTAL, "operation" => self.operation)
                        .increment(1);
                    warn!(
                        operation = self.operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        code = e.code(),
                        error = %redact_error(&e),
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}
