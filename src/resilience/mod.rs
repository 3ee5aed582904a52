//! Resilience primitives guarding the capability resolver.
//!
//! - [`Lock`]: FIFO async mutual exclusion with acquisition timeouts.
//! - [`TokenBucket`]: continuous-refill rate limiter.
//! - [`RetryHandler`]: exponential backoff with jitter and per-attempt timeouts.
//! - [`CircuitBreaker`]: closed / open / half-open failure isolation.
//!
//! Each primitive is usable on its own; [`CapabilityService`](crate::CapabilityService)
//! composes them into one pipeline.

pub mod circuit_breaker;
pub mod lock;
pub mod rate_limit;
pub mod retry;

pub use circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use lock::{Lock, LockGuard, Synchronized};
pub use rate_limit::{RateLimitConfig, TokenBucket};
pub use retry::{RetryConfig, RetryHandler, RetryOutcome};
