use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use huginn::telemetry::{EVENT_DETERMINED, EVENT_FAILED, EVENT_MEMORY_PRESSURE};
use huginn::{
    BreakerConfig, CacheConfig, Capability, CapabilityParams, CapabilityResolver,
    CapabilityService, CapabilitySet, CircuitState, Configuration, HuginnError, ManualSampler,
    MemoryConfig, MemoryPressureLevel, RateLimitConfig, Result, RetryConfig, ServiceConfig,
    TelemetryEvent, TelemetrySink,
};

// ============================================================================
// Mock resolver
// ============================================================================

/// Resolver that fails a scripted number of times, then succeeds.
struct ScriptedResolver {
    failures_left: AtomicU32,
    fail_with: fn() -> HuginnError,
    delay: Duration,
    calls: AtomicU32,
    active: AtomicU32,
    peak: AtomicU32,
}

impl ScriptedResolver {
    fn healthy() -> Self {
        Self::failing(0, || HuginnError::Capability("unused".into()))
    }

    fn failing(failures: u32, fail_with: fn() -> HuginnError) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            fail_with,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            active: AtomicU32::new(0),
            peak: AtomicU32::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn heal(&self) {
        self.failures_left.store(0, Ordering::SeqCst);
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn peak_concurrency(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityResolver for ScriptedResolver {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn resolve(&self, params: &CapabilityParams) -> Result<CapabilitySet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err((self.fail_with)());
        }

        let mut caps = CapabilitySet::new().with(Capability::ToolUse);
        if params.browser_enabled {
            caps = caps.with(Capability::ComputerUse);
        }
        Ok(caps)
    }
}

// ============================================================================
// Telemetry sinks
// ============================================================================

#[derive(Default)]
struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    fn named(&self, name: &str) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn capture_event(&self, event: &TelemetryEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

struct FailingTelemetry;

impl TelemetrySink for FailingTelemetry {
    fn capture_event(&self, _event: &TelemetryEvent) -> Result<()> {
        Err(HuginnError::Telemetry("collector unreachable".into()))
    }
}

struct PanickingTelemetry;

impl TelemetrySink for PanickingTelemetry {
    fn capture_event(&self, _event: &TelemetryEvent) -> Result<()> {
        panic!("sink exploded");
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn params(model: &str) -> CapabilityParams {
    CapabilityParams::new(Configuration::model(model))
}

fn deterministic_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::new()
        .max_retries(max_retries)
        .initial_delay(Duration::from_millis(100))
        .backoff_factor(2.0)
        .jitter(false)
        .attempt_timeout(None)
}

fn base_config() -> ServiceConfig {
    ServiceConfig::new().retry(deterministic_retry(2))
}

fn build(resolver: &Arc<ScriptedResolver>, config: ServiceConfig) -> CapabilityService {
    CapabilityService::builder(resolver.clone())
        .config(config)
        .memory_sampler(Arc::new(ManualSampler::new(0.1)))
        .background_tasks(false)
        .build()
        .unwrap()
}

// ============================================================================
// Caching
// ============================================================================

#[tokio::test]
async fn cache_hits_never_invoke_resolver() {
    let resolver = Arc::new(ScriptedResolver::healthy());
    let service = build(&resolver, base_config());

    for _ in 0..3 {
        for model in ["gpt-4", "claude-3-opus", "gpt-4"] {
            service.determine_capabilities(&params(model)).await.unwrap();
        }
    }

    assert_eq!(resolver.call_count(), 2);
    let stats = service.cache_stats();
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.hits, 7);
    assert_eq!(stats.misses, 2);
}

#[tokio::test]
async fn browser_flag_resolves_separately() {
    let resolver = Arc::new(ScriptedResolver::healthy());
    let service = build(&resolver, base_config());

    let plain = service.determine_capabilities(&params("gpt-4")).await.unwrap();
    let browser = service
        .determine_capabilities(&params("gpt-4").browser_enabled(true))
        .await
        .unwrap();

    assert!(!plain.supports(Capability::ComputerUse));
    assert!(browser.supports(Capability::ComputerUse));
    assert_eq!(resolver.call_count(), 2);
}

// ============================================================================
// Rate limiting
// ============================================================================

#[tokio::test(start_paused = true)]
async fn rate_limit_rejects_then_recovers_after_window() {
    let resolver = Arc::new(ScriptedResolver::healthy());
    let service = build(
        &resolver,
        base_config().rate_limit(
            RateLimitConfig::new()
                .capacity(3)
                .window(Duration::from_secs(10)),
        ),
    );
    let request = params("gpt-4");

    for _ in 0..3 {
        service.determine_capabilities(&request).await.unwrap();
    }

    let err = service.determine_capabilities(&request).await.unwrap_err();
    assert!(matches!(err, HuginnError::RateLimited { retry_after: Some(_) }));
    assert_eq!(err.code(), "RATE_LIMIT_ERROR");

    tokio::time::advance(Duration::from_secs(10)).await;
    service.determine_capabilities(&request).await.unwrap();
    assert_eq!(resolver.call_count(), 1);
}

#[tokio::test]
async fn invalid_input_touches_nothing() {
    let resolver = Arc::new(ScriptedResolver::healthy());
    let service = build(&resolver, base_config());

    let err = service
        .determine_capabilities(&params("gpt-4<script>"))
        .await
        .unwrap_err();
    assert!(matches!(err, HuginnError::Validation { .. }));

    let err = service
        .determine_capabilities(&CapabilityParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HuginnError::Validation { field: "configuration", .. }));

    assert_eq!(service.rate_limit_available(), 100);
    assert_eq!(resolver.call_count(), 0);
    assert_eq!(service.cache_stats().misses, 0);
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn resolver_failing_twice_then_succeeding_is_called_three_times() {
    let resolver = Arc::new(ScriptedResolver::failing(2, || {
        HuginnError::Capability("flaky lookup".into())
    }));
    let service = build(&resolver, base_config());

    let caps = service.determine_capabilities(&params("gpt-4")).await.unwrap();

    assert!(caps.supports(Capability::ToolUse));
    assert_eq!(resolver.call_count(), 3);
    assert_eq!(service.circuit_state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_the_original_error() {
    let resolver = Arc::new(ScriptedResolver::failing(u32::MAX, || {
        HuginnError::InvalidModel("gpt-5".into())
    }));
    let service = build(&resolver, base_config());

    let err = service
        .determine_capabilities(&params("gpt-5"))
        .await
        .unwrap_err();

    assert!(matches!(err, HuginnError::InvalidModel(ref m) if m == "gpt-5"));
    assert_eq!(resolver.call_count(), 3);
    assert_eq!(service.cache_stats().entries, 0);
}

#[tokio::test(start_paused = true)]
async fn slow_resolver_times_out_per_attempt() {
    let resolver = Arc::new(ScriptedResolver::healthy().with_delay(Duration::from_secs(10)));
    let service = build(
        &resolver,
        base_config().retry(deterministic_retry(1).attempt_timeout(Some(Duration::from_millis(50)))),
    );

    let err = service
        .determine_capabilities(&params("gpt-4"))
        .await
        .unwrap_err();

    assert!(matches!(err, HuginnError::Timeout { .. }));
    assert_eq!(resolver.call_count(), 2);
}

// ============================================================================
// Lock
// ============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_misses_are_serialized() {
    let resolver = Arc::new(ScriptedResolver::healthy().with_delay(Duration::from_millis(20)));
    let service = build(&resolver, base_config());
    let requests = [params("gpt-4"), params("claude-3-opus"), params("gemini-pro")];

    let results =
        futures_util::future::join_all(requests.iter().map(|p| service.determine_capabilities(p)))
            .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(resolver.call_count(), 3);
    assert_eq!(resolver.peak_concurrency(), 1);
}

// ============================================================================
// Circuit breaker
// ============================================================================

fn breaker_config() -> ServiceConfig {
    base_config()
        .retry(RetryConfig::disabled().attempt_timeout(None))
        .breaker(
            BreakerConfig::new()
                .failure_threshold(2)
                .reset_timeout(Duration::from_secs(30)),
        )
}

#[tokio::test(start_paused = true)]
async fn open_circuit_rejects_without_calling_resolver() {
    let resolver = Arc::new(ScriptedResolver::failing(u32::MAX, || {
        HuginnError::Capability("down".into())
    }));
    let service = build(&resolver, breaker_config());
    let request = params("gpt-4");

    for _ in 0..2 {
        let err = service.determine_capabilities(&request).await.unwrap_err();
        assert!(matches!(err, HuginnError::Capability(_)));
    }
    assert_eq!(service.circuit_state(), CircuitState::Open);

    let err = service.determine_capabilities(&request).await.unwrap_err();
    assert!(matches!(err, HuginnError::ServiceUnavailable));
    assert_eq!(resolver.call_count(), 2);

    // cool-down elapses, the trial call succeeds and closes the circuit
    resolver.heal();
    tokio::time::advance(Duration::from_secs(30)).await;
    service.determine_capabilities(&request).await.unwrap();
    assert_eq!(service.circuit_state(), CircuitState::Closed);
    assert_eq!(resolver.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn cache_hits_bypass_open_circuit() {
    let resolver = Arc::new(ScriptedResolver::healthy());
    let service = build(&resolver, breaker_config());

    service.determine_capabilities(&params("gpt-4")).await.unwrap();

    resolver.failures_left.store(u32::MAX, Ordering::SeqCst);
    for _ in 0..2 {
        let _ = service.determine_capabilities(&params("claude-3-opus")).await;
    }
    assert_eq!(service.circuit_state(), CircuitState::Open);

    assert!(service.determine_capabilities(&params("gpt-4")).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn caller_cancellation_while_closed_does_not_open_circuit() {
    let resolver = Arc::new(ScriptedResolver::healthy().with_delay(Duration::from_secs(5)));
    let service = build(&resolver, breaker_config());
    let request = params("gpt-4");

    for _ in 0..2 {
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            service.determine_capabilities(&request),
        )
        .await;
        assert!(abandoned.is_err());
    }
    assert_eq!(service.circuit_state(), CircuitState::Closed);

    service.determine_capabilities(&request).await.unwrap();
    assert_eq!(resolver.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn cancelled_trial_call_lets_the_next_caller_try() {
    let resolver = Arc::new(
        ScriptedResolver::failing(2, || HuginnError::Capability("down".into()))
            .with_delay(Duration::from_secs(5)),
    );
    let service = build(&resolver, breaker_config());
    let request = params("gpt-4");

    for _ in 0..2 {
        assert!(service.determine_capabilities(&request).await.is_err());
    }
    assert_eq!(service.circuit_state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(30)).await;
    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        service.determine_capabilities(&request),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(service.circuit_state(), CircuitState::HalfOpen);

    // the slot is free again: this call is the trial and closes the circuit
    service.determine_capabilities(&request).await.unwrap();
    assert_eq!(service.circuit_state(), CircuitState::Closed);
    assert_eq!(resolver.call_count(), 4);
}

// ============================================================================
// Telemetry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn failures_are_reported_to_telemetry() {
    let resolver = Arc::new(ScriptedResolver::failing(u32::MAX, || {
        HuginnError::Capability("down".into())
    }));
    let sink = Arc::new(RecordingTelemetry::default());
    let service = CapabilityService::builder(resolver.clone())
        .config(base_config())
        .telemetry(sink.clone())
        .memory_sampler(Arc::new(ManualSampler::new(0.1)))
        .background_tasks(false)
        .build()
        .unwrap();

    let _ = service.determine_capabilities(&params("gpt-4")).await;

    let failed = sink.named(EVENT_FAILED);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attributes["code"], "CAPABILITY_ERROR");
    assert_eq!(failed[0].attributes["retryable"], true);
    assert!(sink.named(EVENT_DETERMINED).is_empty());

    resolver.heal();
    service.determine_capabilities(&params("gpt-4")).await.unwrap();
    assert_eq!(sink.named(EVENT_DETERMINED).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn broken_telemetry_never_changes_the_result() {
    for sink in [
        Arc::new(FailingTelemetry) as Arc<dyn TelemetrySink>,
        Arc::new(PanickingTelemetry) as Arc<dyn TelemetrySink>,
    ] {
        let resolver = Arc::new(ScriptedResolver::failing(1, || {
            HuginnError::Validation {
                field: "model_id",
                reason: "rejected".into(),
            }
        }));
        let service = CapabilityService::builder(resolver.clone())
            .config(base_config())
            .telemetry(sink)
            .memory_sampler(Arc::new(ManualSampler::new(0.1)))
            .background_tasks(false)
            .build()
            .unwrap();

        let err = service
            .determine_capabilities(&params("gpt-4"))
            .await
            .unwrap_err();
        assert!(matches!(err, HuginnError::Validation { .. }));

        let caps = service.determine_capabilities(&params("gpt-4")).await.unwrap();
        assert!(caps.supports(Capability::ToolUse));
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn dispose_is_idempotent_and_final() {
    let resolver = Arc::new(ScriptedResolver::healthy());
    let service = build(&resolver, base_config());
    service.determine_capabilities(&params("gpt-4")).await.unwrap();

    service.dispose();
    service.dispose();

    assert!(service.is_disposed());
    assert_eq!(service.cache_stats().entries, 0);
    let err = service
        .determine_capabilities(&params("gpt-4"))
        .await
        .unwrap_err();
    assert!(matches!(err, HuginnError::Disposed));
    assert_eq!(resolver.call_count(), 1);
}

#[test]
fn background_tasks_require_a_runtime() {
    let resolver = Arc::new(ScriptedResolver::healthy());
    let err = CapabilityService::builder(resolver.clone())
        .build()
        .map(|_| ())
        .unwrap_err();
    assert_eq!(err.code(), "CONFIGURATION_ERROR");

    assert!(
        CapabilityService::builder(resolver)
            .background_tasks(false)
            .build()
            .is_ok()
    );
}

#[tokio::test]
async fn invalid_config_is_rejected_at_build() {
    let resolver = Arc::new(ScriptedResolver::healthy());
    let result = CapabilityService::builder(resolver)
        .config(ServiceConfig::new().rate_limit(RateLimitConfig::new().capacity(0)))
        .background_tasks(false)
        .build();
    assert!(matches!(result, Err(HuginnError::Configuration(_))));
}

#[tokio::test(start_paused = true)]
async fn sweep_task_purges_expired_entries() {
    let resolver = Arc::new(ScriptedResolver::healthy());
    let service = CapabilityService::builder(resolver.clone())
        .config(
            base_config()
                .cache(CacheConfig::new().ttl(Duration::from_secs(1)))
                .sweep_interval(Duration::from_secs(2)),
        )
        .memory_sampler(Arc::new(ManualSampler::new(0.1)))
        .build()
        .unwrap();

    service.determine_capabilities(&params("gpt-4")).await.unwrap();
    assert_eq!(service.cache_stats().entries, 1);

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(service.cache_stats().entries, 0);
    service.dispose();
}

// ============================================================================
// Memory pressure
// ============================================================================

#[tokio::test]
async fn rising_pressure_clears_the_cache() {
    let resolver = Arc::new(ScriptedResolver::healthy());
    let sampler = Arc::new(ManualSampler::new(0.1));
    let sink = Arc::new(RecordingTelemetry::default());
    let reclaims = Arc::new(AtomicUsize::new(0));
    let counter = reclaims.clone();
    let service = CapabilityService::builder(resolver.clone())
        .config(base_config())
        .telemetry(sink.clone())
        .memory_sampler(sampler.clone())
        .reclaim_hook(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .background_tasks(false)
        .build()
        .unwrap();

    service.determine_capabilities(&params("gpt-4")).await.unwrap();
    service.determine_capabilities(&params("gpt-4o")).await.unwrap();
    assert_eq!(service.cache_stats().entries, 2);

    sampler.set_utilization(0.95);
    assert_eq!(service.check_memory_pressure(), MemoryPressureLevel::Critical);

    assert_eq!(service.cache_stats().entries, 0);
    assert_eq!(reclaims.load(Ordering::SeqCst), 1);
    let events = sink.named(EVENT_MEMORY_PRESSURE);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].attributes["level"], "critical");
    assert_eq!(events[0].attributes["cleared_entries"], 2);

    // the next request resolves again
    service.determine_capabilities(&params("gpt-4")).await.unwrap();
    assert_eq!(resolver.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn monitor_reacts_to_pressure_in_background() {
    let resolver = Arc::new(ScriptedResolver::healthy());
    let sampler = Arc::new(ManualSampler::new(0.1));
    let service = CapabilityService::builder(resolver.clone())
        .config(base_config().memory(MemoryConfig::new().sample_interval(Duration::from_secs(1))))
        .memory_sampler(sampler.clone())
        .build()
        .unwrap();

    service.determine_capabilities(&params("gpt-4")).await.unwrap();
    sampler.set_utilization(0.8);
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    assert_eq!(service.memory_level(), MemoryPressureLevel::Elevated);
    assert_eq!(service.cache_stats().entries, 0);
    service.dispose();
}
