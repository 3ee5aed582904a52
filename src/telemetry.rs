//! Telemetry: metric name constants and the event sink collaborator.
//!
//! Metrics go through the `metrics` facade. Consumers install their own
//! recorder (e.g. prometheus, statsd); without a recorder installed, all
//! metric calls are no-ops.
//!
//! Discrete events (a capability lookup succeeded or failed, memory pressure
//! changed) go to a [`TelemetrySink`] supplied by the host application.
//! Sinks are fire-and-forget: an error from a sink is logged and dropped,
//! never surfaced to the caller of the service.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `huginn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).

use serde_json::{Map, Value};
use tracing::debug;

use crate::Result;

/// Total `determine_capabilities` calls.
///
/// Labels: `status` ("ok" | error code).
pub const REQUESTS_TOTAL: &str = "huginn_requests_total";

/// Duration of sampled `determine_capabilities` calls, in seconds.
///
/// Only recorded for the fraction of calls selected by
/// `performance_sample_rate`.
pub const DETERMINE_DURATION_SECONDS: &str = "huginn_determine_duration_seconds";

/// Total retry attempts (not counting the initial attempt).
pub const RETRIES_TOTAL: &str = "huginn_retries_total";

/// Total capability cache hits.
pub const CACHE_HITS_TOTAL: &str = "huginn_cache_hits_total";

/// Total capability cache misses (including expired entries).
pub const CACHE_MISSES_TOTAL: &str = "huginn_cache_misses_total";

/// Total entries evicted from the capability cache.
///
/// Labels: `reason` ("capacity" | "budget" | "reduction" | "expired").
pub const CACHE_EVICTIONS_TOTAL: &str = "huginn_cache_evictions_total";

/// Total requests rejected by the token bucket.
pub const RATE_LIMITED_TOTAL: &str = "huginn_rate_limited_total";

/// Total circuit breaker state transitions.
///
/// Labels: `to` ("closed" | "open" | "half_open").
pub const CIRCUIT_TRANSITIONS_TOTAL: &str = "huginn_circuit_transitions_total";

/// Total memory pressure level changes.
///
/// Labels: `level` ("normal" | "elevated" | "critical").
pub const MEMORY_PRESSURE_TOTAL: &str = "huginn_memory_pressure_total";

/// Event emitted after a successful capability determination.
pub const EVENT_DETERMINED: &str = "capabilities.determined";

/// Event emitted when capability determination fails.
pub const EVENT_FAILED: &str = "capabilities.failed";

/// Event emitted when the memory pressure level changes.
pub const EVENT_MEMORY_PRESSURE: &str = "memory.pressure_changed";

/// A named telemetry event with flat JSON attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub name: &'static str,
    pub attributes: Map<String, Value>,
}

impl TelemetryEvent {
    /// Create an event with no attributes.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            attributes: Map::new(),
        }
    }

    /// Add an attribute.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Fire-and-forget event sink supplied by the host application.
pub trait TelemetrySink: Send + Sync {
    /// Record an event. Errors are logged by the caller and otherwise ignored.
    fn capture_event(&self, event: &TelemetryEvent) -> Result<()>;
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn capture_event(&self, _event: &TelemetryEvent) -> Result<()> {
        Ok(())
    }
}

/// Sink that forwards events to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn capture_event(&self, event: &TelemetryEvent) -> Result<()> {
        let attributes = Value::Object(event.attributes.clone());
        debug!(event = event.name, %attributes, "telemetry event");
        Ok(())
    }
}
