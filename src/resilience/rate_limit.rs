//! Token-bucket rate limiting.
//!
//! The bucket refills lazily on every [`TokenBucket::consume`] call in
//! proportion to the time elapsed since the last refill, so there is no
//! background timer and no burst at window boundaries. A rejected request
//! leaves the bucket untouched; the caller gets immediate backpressure
//! instead of a queued wait.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Configuration for the token bucket.
///
/// `capacity` tokens are minted per `window`, and the bucket never holds
/// more than `capacity`.
///
/// ```rust
/// # use huginn::RateLimitConfig;
/// # use std::time::Duration;
/// let config = RateLimitConfig::new()
///     .capacity(3)
///     .window(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum tokens held, and tokens minted per window. Default: 100.
    pub capacity: u32,
    /// Time to mint `capacity` tokens. Default: 60s.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bucket capacity.
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the refill window.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Continuous-refill token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    window: Duration,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            capacity: config.capacity,
            window: config.window,
            state: Mutex::new(BucketState {
                tokens: f64::from(config.capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Spend one token if available.
    ///
    /// Returns `true` if the request is admitted.
    pub fn consume(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available (after refilling).
    pub fn available(&self) -> u32 {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        state.tokens as u32
    }

    /// Time until at least one token will be available.
    pub fn time_until_next_token(&self) -> Duration {
        let mut state = self.state.lock();
        let now = Instant::now();
        self.refill(&mut state, now);
        if state.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let next = state.last_refill + self.token_interval();
        next.saturating_duration_since(now)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn token_interval(&self) -> Duration {
        self.window / self.capacity.max(1)
    }

    /// Mint `floor(elapsed / window * capacity)` tokens, capped at capacity.
    ///
    /// The refill clock advances by the time those whole tokens account for,
    /// so fractional progress carries over to the next call instead of being
    /// discarded. A full bucket resets the clock to `now`.
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let capacity = f64::from(self.capacity);
        let elapsed = now.saturating_duration_since(state.last_refill);
        if self.window.is_zero() {
            state.tokens = capacity;
            state.last_refill = now;
            return;
        }

        let minted = (elapsed.as_secs_f64() / self.window.as_secs_f64() * capacity).floor();
        if minted < 1.0 {
            return;
        }

        state.tokens = (state.tokens + minted).min(capacity);
        if state.tokens >= capacity {
            state.last_refill = now;
        } else {
            state.last_refill += self.window.mul_f64(minted / capacity);
        }
    }
}
