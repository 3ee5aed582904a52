//! The capability service: one call, every resilience primitive.
//!
//! [`CapabilityService::determine_capabilities`] runs, in order:
//!
//! 1. disposal check
//! 2. input validation ([`ValidationConfig`])
//! 3. rate limit ([`TokenBucket`])
//! 4. cache lookup; a hit returns immediately
//! 5. circuit breaker check ([`CircuitBreaker`])
//! 6. the resolver under [`RetryHandler`], each attempt holding the service
//!    [`Lock`] and bounded by the per-attempt timeout
//! 7. write-through to the cache
//!
//! One lock serializes every resolver call in the service, whatever the
//! key. Identical concurrent misses are not coalesced; the second caller
//! waits for the lock and then resolves again.
//!
//! The service owns two background tasks, the expired-entry sweep and the
//! memory pressure monitor. Both stop on [`dispose`](CapabilityService::dispose)
//! or when the service is dropped.

mod config;
mod validation;

pub use config::ServiceConfig;
pub use validation::{ValidationConfig, contains_injection, validate_params};

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::{
    CacheStats, CapabilityCache, MemoryManager, MemoryPressureLevel, MemorySampler,
    ProcMeminfoSampler, ReclaimHook,
};
use crate::redact::{redact_error, redact_value};
use crate::resilience::{CircuitBreaker, CircuitState, Lock, RetryHandler, TokenBucket};
use crate::resolver::CapabilityResolver;
use crate::telemetry::{self, NoopTelemetry, TelemetryEvent, TelemetrySink};
use crate::types::{CapabilityParams, CapabilitySet};
use crate::{HuginnError, Result};

struct Inner {
    config: ServiceConfig,
    resolver: Arc<dyn CapabilityResolver>,
    telemetry: Arc<dyn TelemetrySink>,
    lock: Lock,
    bucket: TokenBucket,
    retry: RetryHandler,
    breaker: CircuitBreaker,
    cache: Mutex<CapabilityCache>,
    memory: Arc<MemoryManager>,
    disposed: AtomicBool,
}

impl Inner {
    fn capture(&self, event: TelemetryEvent) {
        let sink = &self.telemetry;
        match catch_unwind(AssertUnwindSafe(|| sink.capture_event(&event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(event = event.name, error = %redact_error(&e), "telemetry sink failed")
            }
            Err(_) => warn!(event = event.name, "telemetry sink panicked"),
        }
    }

    fn on_pressure(&self, level: MemoryPressureLevel) {
        let cleared = {
            let mut cache = self.cache.lock();
            let n = cache.len();
            cache.clear();
            n
        };
        warn!(%level, cleared, "memory pressure, capability cache cleared");
        self.capture(
            TelemetryEvent::new(telemetry::EVENT_MEMORY_PRESSURE)
                .attr("level", level.as_str())
                .attr("cleared_entries", cleared),
        );
    }

    fn sweep(&self) {
        let (expired, reduced) = {
            let mut cache = self.cache.lock();
            (cache.purge_expired(), cache.reduce())
        };
        if expired + reduced > 0 {
            debug!(expired, reduced, "capability cache sweep");
        }
    }
}

/// Reports the outcome of a breaker-admitted call.
///
/// A call dropped before it settles (the caller cancelled the
/// `determine_capabilities` future) is not a resolver failure: nothing is
/// recorded, but a half-open trial call gives up its slot so another
/// caller can try.
struct BreakerCall<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl BreakerCall<'_> {
    fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerCall<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}

/// Resilient capability lookup.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use huginn::{Capability, CapabilityParams, CapabilityService, CatalogResolver, Configuration};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> huginn::Result<()> {
/// let service = CapabilityService::builder(Arc::new(CatalogResolver::new())).build()?;
///
/// let caps = service
///     .determine_capabilities(&CapabilityParams::new(Configuration::model("gpt-4o")))
///     .await?;
/// assert!(caps.supports(Capability::ImageAnalysis));
///
/// service.dispose();
/// # Ok(())
/// # }
/// ```
pub struct CapabilityService {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CapabilityService {
    /// Start building a service around `resolver`.
    pub fn builder(resolver: Arc<dyn CapabilityResolver>) -> CapabilityServiceBuilder {
        CapabilityServiceBuilder::new(resolver)
    }

    /// Resolve the capabilities for `params`.
    ///
    /// Errors from the resolver are retried, then returned as the original
    /// typed error (never wrapped). Every failure is logged with identifiers
    /// redacted and reported to the telemetry sink.
    pub async fn determine_capabilities(&self, params: &CapabilityParams) -> Result<CapabilitySet> {
        let start = Instant::now();
        let result = self.determine(params).await;

        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        metrics::counter!(telemetry::REQUESTS_TOTAL, "status" => status).increment(1);
        if self.sampled() {
            metrics::histogram!(telemetry::DETERMINE_DURATION_SECONDS)
                .record(start.elapsed().as_secs_f64());
        }

        if let Err(e) = &result {
            self.report_failure(params, e);
        }
        result
    }

    async fn determine(&self, params: &CapabilityParams) -> Result<CapabilitySet> {
        let inner = &*self.inner;
        if inner.disposed.load(Ordering::Acquire) {
            return Err(HuginnError::Disposed);
        }

        validate_params(params, &inner.config.validation)?;

        if !inner.bucket.consume() {
            metrics::counter!(telemetry::RATE_LIMITED_TOTAL).increment(1);
            return Err(HuginnError::RateLimited {
                retry_after: Some(inner.bucket.time_until_next_token()),
            });
        }

        let key = params.cache_key();
        let cached = inner.cache.lock().get(&key);
        if let Some(caps) = cached {
            return Ok(caps);
        }

        let Some(trial) = inner.breaker.admit() else {
            return Err(HuginnError::ServiceUnavailable);
        };
        let call = BreakerCall {
            breaker: &inner.breaker,
            trial,
            settled: false,
        };

        let lock_timeout = inner.config.lock_timeout;
        let result = inner
            .retry
            .execute(move || {
                inner
                    .lock
                    .with_lock(lock_timeout, move || inner.resolver.resolve(params))
            })
            .await;

        match result {
            Ok(caps) => {
                call.success();
                let inserted = inner.cache.lock().insert(key, caps.clone());
                if let Err(e) = inserted {
                    warn!(error = %redact_error(&e), "failed to cache capability set");
                }
                inner.capture(
                    TelemetryEvent::new(telemetry::EVENT_DETERMINED)
                        .attr("resolver", inner.resolver.name())
                        .attr("capability_count", caps.len())
                        .attr("browser_enabled", params.browser_enabled),
                );
                Ok(caps)
            }
            Err(e) => {
                call.failure();
                Err(e.into_root())
            }
        }
    }

    fn sampled(&self) -> bool {
        let rate = self.inner.config.performance_sample_rate;
        if rate >= 1.0 {
            true
        } else if rate <= 0.0 {
            false
        } else {
            rand::thread_rng().gen_bool(rate)
        }
    }

    fn report_failure(&self, params: &CapabilityParams, err: &HuginnError) {
        if matches!(err, HuginnError::Disposed) {
            return;
        }
        let context = redact_value(json!({
            "operation": "determine_capabilities",
            "configuration": params.configuration,
            "model_info": params.model_info,
            "browser_enabled": params.browser_enabled,
        }));
        let message = redact_error(err);
        match err {
            HuginnError::Validation { .. } | HuginnError::RateLimited { .. } => {
                warn!(code = err.code(), error = %message, %context, "capability request rejected")
            }
            _ => error!(code = err.code(), error = %message, %context, "capability determination failed"),
        }

        self.inner.capture(
            TelemetryEvent::new(telemetry::EVENT_FAILED)
                .attr("code", err.code())
                .attr("retryable", err.is_retryable())
                .attr("browser_enabled", params.browser_enabled),
        );
    }

    /// Stop background tasks and drop cached entries. Later calls fail with
    /// [`HuginnError::Disposed`]. Safe to call more than once.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.cache.lock().clear();
        info!("capability service disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.lock().stats()
    }

    pub fn clear_cache(&self) {
        self.inner.cache.lock().clear();
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.inner.breaker.state()
    }

    pub fn memory_level(&self) -> MemoryPressureLevel {
        self.inner.memory.level()
    }

    /// Sample memory now instead of waiting for the monitor.
    pub fn check_memory_pressure(&self) -> MemoryPressureLevel {
        self.inner.memory.check()
    }

    /// Run the expired-entry sweep now.
    pub fn sweep_cache(&self) {
        self.inner.sweep();
    }

    /// Tokens left in the rate limiter.
    pub fn rate_limit_available(&self) -> u32 {
        self.inner.bucket.available()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }
}

impl Drop for CapabilityService {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// Builder for [`CapabilityService`].
pub struct CapabilityServiceBuilder {
    resolver: Arc<dyn CapabilityResolver>,
    config: ServiceConfig,
    telemetry: Arc<dyn TelemetrySink>,
    sampler: Option<Arc<dyn MemorySampler>>,
    reclaim_hook: Option<ReclaimHook>,
    background_tasks: bool,
}

impl CapabilityServiceBuilder {
    pub fn new(resolver: Arc<dyn CapabilityResolver>) -> Self {
        Self {
            resolver,
            config: ServiceConfig::default(),
            telemetry: Arc::new(NoopTelemetry),
            sampler: None,
            reclaim_hook: None,
            background_tasks: true,
        }
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Event sink. Default: [`NoopTelemetry`].
    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    /// Memory source. Default: [`ProcMeminfoSampler`].
    pub fn memory_sampler(mut self, sampler: Arc<dyn MemorySampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Hook fired on entering critical memory pressure.
    pub fn reclaim_hook(mut self, hook: ReclaimHook) -> Self {
        self.reclaim_hook = Some(hook);
        self
    }

    /// Whether to spawn the sweep and memory monitor tasks. Default: true.
    ///
    /// Without them, [`CapabilityService::sweep_cache`] and
    /// [`CapabilityService::check_memory_pressure`] can be driven by hand.
    pub fn background_tasks(mut self, enabled: bool) -> Self {
        self.background_tasks = enabled;
        self
    }

    /// Build the service.
    ///
    /// Fails with [`HuginnError::Configuration`] if the config is invalid,
    /// or if background tasks are enabled outside a tokio runtime.
    pub fn build(self) -> Result<CapabilityService> {
        self.config.validate()?;
        if self.background_tasks && tokio::runtime::Handle::try_current().is_err() {
            return Err(HuginnError::Configuration(
                "background tasks require a tokio runtime".into(),
            ));
        }

        let sampler = self
            .sampler
            .unwrap_or_else(|| Arc::new(ProcMeminfoSampler::default()) as Arc<dyn MemorySampler>);
        let mut memory = MemoryManager::new(self.config.memory, sampler);
        if let Some(hook) = self.reclaim_hook {
            memory = memory.with_reclaim_hook(hook);
        }

        let config = self.config;
        let inner = Arc::new(Inner {
            resolver: self.resolver,
            telemetry: self.telemetry,
            lock: Lock::new(),
            bucket: TokenBucket::new(&config.rate_limit),
            retry: RetryHandler::new(config.retry.clone(), "resolve_capabilities"),
            breaker: CircuitBreaker::new(config.breaker),
            cache: Mutex::new(CapabilityCache::new(config.cache.clone())),
            memory: Arc::new(memory),
            disposed: AtomicBool::new(false),
            config,
        });

        let weak = Arc::downgrade(&inner);
        inner.memory.on_pressure_change(Arc::new(move |level: MemoryPressureLevel| {
            if let Some(inner) = weak.upgrade() {
                inner.on_pressure(level);
            }
        }));

        let mut tasks = Vec::new();
        if self.background_tasks {
            tasks.push(spawn_sweep(
                Arc::downgrade(&inner),
                inner.config.sweep_interval,
            ));
            tasks.push(inner.memory.spawn_monitor());
        }

        debug!(resolver = inner.resolver.name(), "capability service started");
        Ok(CapabilityService {
            inner,
            tasks: Mutex::new(tasks),
        })
    }
}

fn spawn_sweep(weak: Weak<Inner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            inner.sweep();
        }
    })
}
