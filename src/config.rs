//! TOML configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. explicit path
//! 2. `~/.huginn/config.toml` (user)
//! 3. `/etc/huginn/config.toml` (system)
//!
//! With no file present, every value takes its default. Durations are
//! integer milliseconds; a timeout of `0` means "no timeout".
//!
//! ```toml
//! [retry]
//! max_retries = 3
//! initial_delay_ms = 250
//! jitter = false
//!
//! [rate_limit]
//! capacity = 20
//! window_ms = 10000
//!
//! [service]
//! performance_sample_rate = 1.0
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{CacheConfig, MemoryConfig};
use crate::resilience::{BreakerConfig, RateLimitConfig, RetryConfig};
use crate::service::{ServiceConfig, ValidationConfig};
use crate::{HuginnError, Result};

/// File-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub breaker: BreakerSection,
    #[serde(default)]
    pub validation: ValidationSection,
    #[serde(default)]
    pub memory: MemorySection,
    #[serde(default)]
    pub service: ServiceSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
    /// 0 disables the per-attempt timeout.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_attempt_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_reduction_threshold")]
    pub reduction_threshold: u8,
    #[serde(default = "default_reduction_ratio")]
    pub reduction_ratio: u8,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_bytes: default_max_bytes(),
            ttl_ms: default_ttl_ms(),
            reduction_threshold: default_reduction_threshold(),
            reduction_ratio: default_reduction_ratio(),
        }
    }
}

fn default_max_entries() -> usize {
    100
}

fn default_max_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_ttl_ms() -> u64 {
    3_600_000
}

fn default_reduction_threshold() -> u8 {
    90
}

fn default_reduction_ratio() -> u8 {
    70
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSection {
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window_ms: default_window_ms(),
        }
    }
}

fn default_capacity() -> u32 {
    100
}

fn default_window_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationSection {
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    #[serde(default = "default_max_identifier_len")]
    pub max_identifier_len: usize,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            max_identifier_len: default_max_identifier_len(),
        }
    }
}

fn default_max_payload_bytes() -> usize {
    100 * 1024
}

fn default_max_identifier_len() -> usize {
    256
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemorySection {
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default = "default_elevated_threshold")]
    pub elevated_threshold: f64,
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,
    #[serde(default = "default_min_reclaim_interval_ms")]
    pub min_reclaim_interval_ms: u64,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            elevated_threshold: default_elevated_threshold(),
            critical_threshold: default_critical_threshold(),
            min_reclaim_interval_ms: default_min_reclaim_interval_ms(),
        }
    }
}

fn default_sample_interval_ms() -> u64 {
    5_000
}

fn default_elevated_threshold() -> f64 {
    0.70
}

fn default_critical_threshold() -> f64 {
    0.90
}

fn default_min_reclaim_interval_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSection {
    /// 0 waits for the lock indefinitely.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_performance_sample_rate")]
    pub performance_sample_rate: f64,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            performance_sample_rate: default_performance_sample_rate(),
        }
    }
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

fn default_sweep_interval_ms() -> u64 {
    300_000
}

fn default_performance_sample_rate() -> f64 {
    0.1
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn optional_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// An explicit path must exist. Without one, the first of the user and
    /// system files that exists is used, falling back to defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| HuginnError::Configuration(format!("Failed to parse config: {e}")))
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            HuginnError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(HuginnError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".huginn").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/huginn/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Convert to a validated [`ServiceConfig`].
    pub fn into_service_config(self) -> Result<ServiceConfig> {
        let Config {
            retry,
            cache,
            rate_limit,
            breaker,
            validation,
            memory,
            service,
        } = self;

        let config = ServiceConfig {
            retry: RetryConfig::new()
                .max_retries(retry.max_retries)
                .initial_delay(millis(retry.initial_delay_ms))
                .backoff_factor(retry.backoff_factor)
                .max_delay(millis(retry.max_delay_ms))
                .jitter(retry.jitter)
                .attempt_timeout(optional_millis(retry.attempt_timeout_ms)),
            cache: CacheConfig::new()
                .max_entries(cache.max_entries)
                .max_bytes(cache.max_bytes)
                .ttl(millis(cache.ttl_ms))
                .reduction(cache.reduction_threshold, cache.reduction_ratio),
            rate_limit: RateLimitConfig::new()
                .capacity(rate_limit.capacity)
                .window(millis(rate_limit.window_ms)),
            breaker: BreakerConfig::new()
                .failure_threshold(breaker.failure_threshold)
                .reset_timeout(millis(breaker.reset_timeout_ms)),
            validation: ValidationConfig::new()
                .max_payload_bytes(validation.max_payload_bytes)
                .max_identifier_len(validation.max_identifier_len),
            memory: MemoryConfig::new()
                .sample_interval(millis(memory.sample_interval_ms))
                .thresholds(memory.elevated_threshold, memory.critical_threshold)
                .min_reclaim_interval(millis(memory.min_reclaim_interval_ms)),
            lock_timeout: optional_millis(service.lock_timeout_ms),
            sweep_interval: millis(service.sweep_interval_ms),
            performance_sample_rate: service.performance_sample_rate,
        };
        config.validate()?;
        Ok(config)
    }
}
