//! LRU + TTL cache for resolved capability sets.
//!
//! Bounded two ways: by entry count, where an insert into a full cache
//! evicts exactly the single least recently used entry first, and by
//! serialized bytes, tracked with [`CacheBudget`]. Expired entries are
//! treated as misses on read and removed by [`CapabilityCache::purge_expired`].
//! [`CapabilityCache::reduce`] is the batch eviction run once usage crosses
//! the reduction threshold.
//!
//! The cache is not internally synchronized; the service keeps it behind a
//! mutex and never holds that mutex across an await point.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::budget::{CacheBudget, item_size};
use super::lru::LruTracker;
use crate::telemetry;
use crate::types::{CacheKey, CapabilitySet};
use crate::Result;

/// Configuration for the capability cache.
///
/// ```rust
/// # use huginn::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(500)
///     .ttl(Duration::from_secs(600));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum cached entries. 0 disables caching. Default: 100.
    pub max_entries: usize,
    /// Byte budget for serialized entries. Default: 10 MiB.
    pub max_bytes: u64,
    /// Entry lifetime. Default: 1 hour.
    pub ttl: Duration,
    /// Usage percentage that triggers batch reduction. Default: 90.
    pub reduction_threshold: u8,
    /// Usage percentage batch reduction aims for. Default: 70.
    pub reduction_ratio: u8,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            max_bytes: 10 * 1024 * 1024,
            ttl: Duration::from_secs(3600),
            reduction_threshold: 90,
            reduction_ratio: 70,
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the byte budget.
    pub fn max_bytes(mut self, bytes: u64) -> Self {
        self.max_bytes = bytes;
        self
    }

    /// Set the time-to-live for cached entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the reduction threshold and target, as percentages of `max_bytes`.
    pub fn reduction(mut self, threshold: u8, ratio: u8) -> Self {
        self.reduction_threshold = threshold;
        self.reduction_ratio = ratio;
        self
    }
}

/// A cached capability set.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: CapabilitySet,
    pub created_at: Instant,
    size: u64,
}

impl CacheEntry {
    /// Serialized size charged against the byte budget.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= ttl
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// `hits / (hits + misses)`, or 0 before the first lookup.
    pub hit_rate: f64,
}

/// LRU + TTL cache of capability sets keyed by [`CacheKey`].
#[derive(Debug)]
pub struct CapabilityCache {
    config: CacheConfig,
    entries: HashMap<CacheKey, CacheEntry>,
    lru: LruTracker<CacheKey>,
    budget: CacheBudget,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CapabilityCache {
    pub fn new(config: CacheConfig) -> Self {
        let budget = CacheBudget::new(
            config.max_bytes,
            config.reduction_threshold,
            config.reduction_ratio,
        );
        Self {
            config,
            entries: HashMap::new(),
            lru: LruTracker::new(),
            budget,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up a live entry, refreshing its recency.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&mut self, key: &CacheKey) -> Option<CapabilitySet> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            None => {
                self.record_miss();
                return None;
            }
            Some(entry) => entry.is_expired(self.config.ttl, now),
        };

        if expired {
            self.evict(key, "expired");
            self.record_miss();
            return None;
        }

        self.lru.touch(key);
        self.hits += 1;
        metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Whether a live entry exists, without touching recency or stats.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| !e.is_expired(self.config.ttl, Instant::now()))
    }

    /// Insert or replace an entry.
    ///
    /// A full cache first evicts its least recently used entry; a cache
    /// over its byte budget evicts in LRU order until the item fits.
    /// Returns `false` if the item was not cached (caching disabled, or
    /// the item alone exceeds the whole budget).
    pub fn insert(&mut self, key: CacheKey, value: CapabilitySet) -> Result<bool> {
        let size = item_size(&value)?;

        if let Some(old) = self.entries.remove(&key) {
            self.budget.remove_from_cache_size(old.size);
            self.lru.remove(&key);
        }

        if self.config.max_entries == 0 || size > self.budget.max_bytes() {
            debug!(size, max_bytes = self.budget.max_bytes(), "not caching capability set");
            return Ok(false);
        }

        if self.entries.len() >= self.config.max_entries {
            self.evict_oldest("capacity");
        }
        while !self.budget.can_add_to_cache(size) {
            if !self.evict_oldest("budget") {
                break;
            }
        }

        self.budget.add_to_cache_size(size);
        self.lru.touch(&key);
        self.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                created_at: Instant::now(),
                size,
            },
        );
        Ok(true)
    }

    /// Remove an entry. Returns whether it was present.
    pub fn remove(&mut self, key: &CacheKey) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.budget.remove_from_cache_size(entry.size);
                self.lru.remove(key);
                true
            }
            None => false,
        }
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let ttl = self.config.ttl;
        let expired: Vec<CacheKey> = self
            .entries
            .values()
            .filter(|e| e.is_expired(ttl, now))
            .map(|e| e.key.clone())
            .collect();
        for key in &expired {
            self.evict(key, "expired");
        }
        expired.len()
    }

    /// Evict in LRU order until usage is back at the reduction target.
    ///
    /// No-op unless usage is above the reduction threshold. Returns how
    /// many entries were evicted.
    pub fn reduce(&mut self) -> usize {
        if !self.budget.should_reduce_cache() {
            return 0;
        }
        let target = self.budget.reduction_amount();
        let start = self.budget.current_size();
        let mut evicted = 0;
        while start - self.budget.current_size() < target {
            if !self.evict_oldest("reduction") {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    /// Drop every entry. Statistics are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.budget.reset();
    }

    /// Keys in eviction order, least recently used first.
    pub fn lru_keys(&self, n: usize) -> Vec<CacheKey> {
        self.lru.oldest(n)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            entries: self.entries.len(),
            bytes: self.budget.current_size(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn record_miss(&mut self) {
        self.misses += 1;
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
    }

    fn evict_oldest(&mut self, reason: &'static str) -> bool {
        match self.lru.pop_oldest() {
            Some(key) => {
                self.evict(&key, reason);
                true
            }
            None => false,
        }
    }

    fn evict(&mut self, key: &CacheKey, reason: &'static str) {
        if self.remove(key) {
            self.evictions += 1;
            metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL, "reason" => reason).increment(1);
        }
    }
}
