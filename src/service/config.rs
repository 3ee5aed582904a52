//! Aggregate configuration for [`CapabilityService`](super::CapabilityService).

use std::time::Duration;

use crate::cache::{CacheConfig, MemoryConfig};
use crate::resilience::{BreakerConfig, RateLimitConfig, RetryConfig};
use crate::service::ValidationConfig;
use crate::{HuginnError, Result};

/// Every knob the service exposes.
///
/// ```rust
/// # use huginn::{RateLimitConfig, RetryConfig, ServiceConfig};
/// # use std::time::Duration;
/// let config = ServiceConfig::new()
///     .retry(RetryConfig::new().max_retries(3))
///     .rate_limit(RateLimitConfig::new().capacity(10).window(Duration::from_secs(1)))
///     .performance_sample_rate(1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub breaker: BreakerConfig,
    pub validation: ValidationConfig,
    pub memory: MemoryConfig,
    /// Maximum wait for the resolver lock. `None` waits forever. Default: 10s.
    pub lock_timeout: Option<Duration>,
    /// Interval of the expired-entry sweep. Default: 5 minutes.
    pub sweep_interval: Duration,
    /// Fraction of calls whose latency is recorded, in `0.0..=1.0`. Default: 0.1.
    pub performance_sample_rate: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            breaker: BreakerConfig::default(),
            validation: ValidationConfig::default(),
            memory: MemoryConfig::default(),
            lock_timeout: Some(Duration::from_secs(10)),
            sweep_interval: Duration::from_secs(300),
            performance_sample_rate: 0.1,
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    pub fn lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Clamped to `0.0..=1.0`.
    pub fn performance_sample_rate(mut self, rate: f64) -> Self {
        self.performance_sample_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Check that the values are usable together.
    pub fn validate(&self) -> Result<()> {
        fn ensure(ok: bool, msg: &str) -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(HuginnError::Configuration(msg.to_string()))
            }
        }

        ensure(self.rate_limit.capacity > 0, "rate limit capacity must be > 0")?;
        ensure(!self.rate_limit.window.is_zero(), "rate limit window must be > 0")?;
        ensure(
            self.breaker.failure_threshold > 0,
            "breaker failure threshold must be > 0",
        )?;
        ensure(
            self.retry.backoff_factor.is_finite() && self.retry.backoff_factor >= 1.0,
            "retry backoff factor must be >= 1",
        )?;
        ensure(
            self.cache.reduction_ratio <= self.cache.reduction_threshold
                && self.cache.reduction_threshold <= 100,
            "cache reduction ratio must not exceed threshold, threshold must be <= 100",
        )?;
        let memory = &self.memory;
        ensure(
            memory.elevated_threshold > 0.0
                && memory.elevated_threshold <= memory.critical_threshold
                && memory.critical_threshold <= 1.0,
            "memory thresholds must satisfy 0 < elevated <= critical <= 1",
        )?;
        ensure(
            !memory.sample_interval.is_zero(),
            "memory sample interval must be > 0",
        )?;
        ensure(!self.sweep_interval.is_zero(), "sweep interval must be > 0")?;
        ensure(
            (0.0..=1.0).contains(&self.performance_sample_rate),
            "performance sample rate must be within 0..=1",
        )?;
        Ok(())
    }
}
