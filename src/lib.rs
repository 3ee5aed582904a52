//! Huginn - resilient model capability resolution
//!
//! This crate answers "what does this model/configuration support?" by
//! running a [`CapabilityResolver`] behind a stack of resilience
//! primitives: input validation, a token-bucket rate limiter, an LRU + TTL
//! cache with byte budgeting and memory-pressure clearing, a circuit
//! breaker, a FIFO lock serializing resolver calls, and retry with
//! exponential backoff and per-attempt timeouts.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use huginn::{
//!     Capability, CapabilityParams, CapabilityService, CatalogResolver, Configuration,
//!     RateLimitConfig, ServiceConfig,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> huginn::Result<()> {
//!     let service = CapabilityService::builder(Arc::new(CatalogResolver::new()))
//!         .config(ServiceConfig::new().rate_limit(RateLimitConfig::new().capacity(50)))
//!         .build()?;
//!
//!     let params = CapabilityParams::new(Configuration::model("claude-sonnet-4-5"))
//!         .browser_enabled(true);
//!     let caps = service.determine_capabilities(&params).await?;
//!     assert!(caps.supports(Capability::ComputerUse));
//!
//!     service.dispose();
//!     Ok(())
//! }
//! ```
//!
//! The primitives in [`resilience`] and [`cache`] are usable on their own.
//!
//! # Features
//!
//! - `config-file` (default): [`config::Config`], TOML configuration loading.

pub mod cache;
#[cfg(feature = "config-file")]
pub mod config;
pub mod error;
pub mod redact;
pub mod resilience;
pub mod resolver;
pub mod service;
pub mod telemetry;
pub mod types;

pub use cache::{
    CacheConfig, CacheStats, CapabilityCache, ManualSampler, MemoryConfig, MemoryManager,
    MemoryPressureLevel, MemorySampler, MemoryUsage, ProcMeminfoSampler, calculate_item_size,
};
pub use error::{HuginnError, Result};
pub use resilience::{
    BreakerConfig, CircuitBreaker, CircuitState, Lock, LockGuard, RateLimitConfig, RetryConfig,
    RetryHandler, RetryOutcome, Synchronized, TokenBucket,
};
pub use resolver::{CapabilityResolver, CatalogResolver};
pub use service::{CapabilityService, CapabilityServiceBuilder, ServiceConfig, ValidationConfig};
pub use telemetry::{NoopTelemetry, TelemetryEvent, TelemetrySink, TracingTelemetry};
pub use types::{
    CacheKey, Capability, CapabilityParams, CapabilitySet, CapabilityStrength, Configuration,
    DEFAULT_MODEL_ID, ModelInfo,
};
