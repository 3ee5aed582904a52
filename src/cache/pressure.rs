//! System memory pressure monitoring.
//!
//! [`MemoryManager`] samples system-wide memory utilization through a
//! [`MemorySampler`], classifies it against two thresholds and notifies
//! registered handlers when the level rises into `Elevated` or `Critical`.
//! Entering `Critical` additionally fires the optional reclaim hook, at most
//! once per `min_reclaim_interval`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::telemetry;
use crate::{HuginnError, Result};

/// Classified memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum MemoryPressureLevel {
    #[default]
    Normal,
    Elevated,
    Critical,
}

impl MemoryPressureLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Elevated => "elevated",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for MemoryPressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single memory reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl MemoryUsage {
    /// Fraction of memory in use, in `0.0..=1.0`.
    pub fn utilization(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        (used as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
    }
}

/// Source of memory readings.
pub trait MemorySampler: Send + Sync {
    fn sample(&self) -> Result<MemoryUsage>;
}

/// Reads `MemTotal` and `MemAvailable` from `/proc/meminfo`.
#[derive(Debug, Clone)]
pub struct ProcMeminfoSampler {
    path: PathBuf,
}

impl Default for ProcMeminfoSampler {
    fn default() -> Self {
        Self::new("/proc/meminfo")
    }
}

impl ProcMeminfoSampler {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl MemorySampler for ProcMeminfoSampler {
    fn sample(&self) -> Result<MemoryUsage> {
        let contents = fs::read_to_string(&self.path).map_err(|e| {
            HuginnError::MemorySample(format!("{}: {e}", self.path.display()))
        })?;
        parse_meminfo(&contents)
    }
}

fn parse_meminfo(contents: &str) -> Result<MemoryUsage> {
    let mut total_kb = None;
    let mut available_kb = None;

    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let key = fields.next().unwrap_or_default();
        let value = fields.next().unwrap_or_default();
        match key {
            "MemTotal:" => total_kb = Some(parse_kb_field("MemTotal", value)?),
            "MemAvailable:" => available_kb = Some(parse_kb_field("MemAvailable", value)?),
            _ => {}
        }
    }

    let total_kb = total_kb
        .ok_or_else(|| HuginnError::MemorySample("MemTotal missing from meminfo".into()))?;
    let available_kb = available_kb
        .ok_or_else(|| HuginnError::MemorySample("MemAvailable missing from meminfo".into()))?;

    Ok(MemoryUsage {
        total_bytes: total_kb.saturating_mul(1024),
        available_bytes: available_kb.saturating_mul(1024),
    })
}

fn parse_kb_field(field: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|e| HuginnError::MemorySample(format!("invalid {field} value {value:?}: {e}")))
}

/// Sampler whose reading is set by hand. Useful in tests and for hosts that
/// obtain memory figures elsewhere.
#[derive(Debug)]
pub struct ManualSampler {
    reading: Mutex<std::result::Result<MemoryUsage, String>>,
}

impl Default for ManualSampler {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl ManualSampler {
    const TOTAL: u64 = 1_000_000;

    pub fn new(utilization: f64) -> Self {
        Self {
            reading: Mutex::new(Ok(Self::usage_for(utilization))),
        }
    }

    pub fn set_utilization(&self, utilization: f64) {
        *self.reading.lock() = Ok(Self::usage_for(utilization));
    }

    /// Make subsequent samples fail with `reason`.
    pub fn set_error(&self, reason: impl Into<String>) {
        *self.reading.lock() = Err(reason.into());
    }

    fn usage_for(utilization: f64) -> MemoryUsage {
        let used = (utilization.clamp(0.0, 1.0) * Self::TOTAL as f64).round() as u64;
        MemoryUsage {
            total_bytes: Self::TOTAL,
            available_bytes: Self::TOTAL - used,
        }
    }
}

impl MemorySampler for ManualSampler {
    fn sample(&self) -> Result<MemoryUsage> {
        self.reading
            .lock()
            .clone()
            .map_err(HuginnError::MemorySample)
    }
}

/// Configuration for memory pressure monitoring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryConfig {
    /// Interval between samples. Default: 5s.
    pub sample_interval: Duration,
    /// Utilization at or above which pressure is `Elevated`. Default: 0.70.
    pub elevated_threshold: f64,
    /// Utilization at or above which pressure is `Critical`. Default: 0.90.
    pub critical_threshold: f64,
    /// Minimum time between reclaim hook invocations. Default: 60s.
    pub min_reclaim_interval: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(5),
            elevated_threshold: 0.70,
            critical_threshold: 0.90,
            min_reclaim_interval: Duration::from_secs(60),
        }
    }
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    pub fn thresholds(mut self, elevated: f64, critical: f64) -> Self {
        self.elevated_threshold = elevated;
        self.critical_threshold = critical;
        self
    }

    pub fn min_reclaim_interval(mut self, interval: Duration) -> Self {
        self.min_reclaim_interval = interval;
        self
    }
}

/// Called with the new level when pressure rises.
pub type PressureHandler = Arc<dyn Fn(MemoryPressureLevel) + Send + Sync>;

/// Hint to release memory, fired on entering `Critical`.
pub type ReclaimHook = Arc<dyn Fn() + Send + Sync>;

struct PressureState {
    level: MemoryPressureLevel,
    last_reclaim: Option<Instant>,
}

/// Samples memory utilization and dispatches pressure changes.
pub struct MemoryManager {
    config: MemoryConfig,
    sampler: Arc<dyn MemorySampler>,
    state: Mutex<PressureState>,
    handlers: Mutex<Vec<PressureHandler>>,
    reclaim: Option<ReclaimHook>,
}

impl fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManager")
            .field("config", &self.config)
            .field("level", &self.level())
            .field("handlers", &self.handlers.lock().len())
            .field("reclaim", &self.reclaim.is_some())
            .finish()
    }
}

impl MemoryManager {
    pub fn new(config: MemoryConfig, sampler: Arc<dyn MemorySampler>) -> Self {
        Self {
            config,
            sampler,
            state: Mutex::new(PressureState {
                level: MemoryPressureLevel::Normal,
                last_reclaim: None,
            }),
            handlers: Mutex::new(Vec::new()),
            reclaim: None,
        }
    }

    /// Set the hook fired on entering `Critical`. Without one, the reclaim
    /// step is a no-op.
    pub fn with_reclaim_hook(mut self, hook: ReclaimHook) -> Self {
        self.reclaim = Some(hook);
        self
    }

    /// Register a handler for rises into `Elevated` or `Critical`.
    pub fn on_pressure_change(&self, handler: PressureHandler) {
        self.handlers.lock().push(handler);
    }

    /// Level as of the last successful sample.
    pub fn level(&self) -> MemoryPressureLevel {
        self.state.lock().level
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Classify a utilization fraction against the configured thresholds.
    pub fn classify(&self, utilization: f64) -> MemoryPressureLevel {
        if utilization >= self.config.critical_threshold {
            MemoryPressureLevel::Critical
        } else if utilization >= self.config.elevated_threshold {
            MemoryPressureLevel::Elevated
        } else {
            MemoryPressureLevel::Normal
        }
    }

    /// Take one sample and act on any level change.
    ///
    /// A failed sample is logged and leaves the level unchanged.
    pub fn check(&self) -> MemoryPressureLevel {
        let usage = match self.sampler.sample() {
            Ok(usage) => usage,
            Err(e) => {
                warn!(error = %e, "memory sample failed");
                return self.level();
            }
        };
        let utilization = usage.utilization();
        let next = self.classify(utilization);

        let (previous, reclaim) = {
            let mut s = self.state.lock();
            let previous = s.level;
            if previous == next {
                return next;
            }
            s.level = next;
            let reclaim = next == MemoryPressureLevel::Critical && self.reclaim_due(&mut s);
            (previous, reclaim)
        };

        metrics::counter!(telemetry::MEMORY_PRESSURE_TOTAL, "level" => next.as_str()).increment(1);
        if next > previous {
            warn!(from = %previous, to = %next, utilization, "memory pressure rising");
        } else {
            info!(from = %previous, to = %next, utilization, "memory pressure easing");
        }

        if next != MemoryPressureLevel::Normal {
            let handlers = self.handlers.lock().clone();
            for handler in handlers {
                handler(next);
            }
        }
        if reclaim {
            if let Some(hook) = &self.reclaim {
                debug!("invoking reclaim hook");
                hook();
            }
        }
        next
    }

    fn reclaim_due(&self, s: &mut PressureState) -> bool {
        if self.reclaim.is_none() {
            return false;
        }
        let now = Instant::now();
        let due = s
            .last_reclaim
            .is_none_or(|last| now.saturating_duration_since(last) >= self.config.min_reclaim_interval);
        if due {
            s.last_reclaim = Some(now);
        }
        due
    }

    /// Sample on `sample_interval` until the manager is dropped or the
    /// returned task is aborted.
    pub fn spawn_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sample_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.check();
            }
        })
    }
}
