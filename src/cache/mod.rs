//! Caching subsystem.
//!
//! - [`CapabilityCache`]: LRU + TTL cache of resolved capability sets,
//!   bounded by entry count and by a byte budget.
//! - [`budget::CacheBudget`]: byte accounting and reduction thresholds.
//! - [`lru::LruTracker`]: strict least-recently-used ordering.
//! - [`pressure::MemoryManager`]: system memory sampling; the service
//!   clears the whole cache when pressure rises.

pub mod budget;
pub mod capability;
pub mod lru;
pub mod pressure;

pub use budget::{CacheBudget, calculate_item_size};
pub use capability::{CacheConfig, CacheEntry, CacheStats, CapabilityCache};
pub use lru::LruTracker;
pub use pressure::{
    ManualSampler, MemoryConfig, MemoryManager, MemoryPressureLevel, MemorySampler, MemoryUsage,
    PressureHandler, ProcMeminfoSampler, ReclaimHook,
};
