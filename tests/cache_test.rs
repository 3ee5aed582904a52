use std::time::Duration;

use huginn::cache::{CacheBudget, LruTracker};
use huginn::{
    CacheConfig, CacheKey, Capability, CapabilityCache, CapabilitySet, CapabilityStrength,
    calculate_item_size,
};
use serde_json::{Value, json};

fn key(model: &str) -> CacheKey {
    CacheKey::new(model, false)
}

fn caps(cap: Capability) -> CapabilitySet {
    CapabilitySet::new().with(cap)
}

// ============================================================================
// LRU eviction
// ============================================================================

#[tokio::test]
async fn overflow_evicts_exactly_the_least_recently_used() {
    let mut cache = CapabilityCache::new(CacheConfig::new().max_entries(3));
    cache.insert(key("a"), caps(Capability::ToolUse)).unwrap();
    cache.insert(key("b"), caps(Capability::ToolUse)).unwrap();
    cache.insert(key("c"), caps(Capability::ToolUse)).unwrap();

    // refresh the oldest entry
    assert!(cache.get(&key("a")).is_some());
    cache.insert(key("d"), caps(Capability::ToolUse)).unwrap();

    assert_eq!(cache.len(), 3);
    assert!(cache.contains(&key("a")));
    assert!(!cache.contains(&key("b")));
    assert!(cache.contains(&key("c")));
    assert!(cache.contains(&key("d")));
    assert_eq!(cache.stats().evictions, 1);
}

#[tokio::test]
async fn browser_flag_is_part_of_the_key() {
    let mut cache = CapabilityCache::new(CacheConfig::new());
    cache
        .insert(CacheKey::new("gpt-4", true), caps(Capability::ComputerUse))
        .unwrap();

    assert!(cache.get(&CacheKey::new("gpt-4", false)).is_none());
    let hit = cache.get(&CacheKey::new("gpt-4", true)).unwrap();
    assert!(hit.supports(Capability::ComputerUse));
    assert_eq!(CacheKey::new("gpt-4", true).to_string(), "gpt-4:true");
}

#[tokio::test]
async fn zero_capacity_disables_caching() {
    let mut cache = CapabilityCache::new(CacheConfig::new().max_entries(0));
    assert!(!cache.insert(key("a"), caps(Capability::ToolUse)).unwrap());
    assert!(cache.get(&key("a")).is_none());
}

#[tokio::test]
async fn clear_resets_bytes_but_keeps_counters() {
    let mut cache = CapabilityCache::new(CacheConfig::new());
    cache.insert(key("a"), caps(Capability::ToolUse)).unwrap();
    cache.get(&key("a"));
    cache.clear();

    let stats = cache.stats();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.bytes, 0);
    assert_eq!(stats.hits, 1);
}

#[test]
fn lru_tracker_lists_oldest_first() {
    let mut lru = LruTracker::new();
    for k in ["a", "b", "c", "d"] {
        lru.touch(&k);
    }
    lru.touch(&"b");
    assert_eq!(lru.oldest(3), vec!["a", "c", "d"]);
}

// ============================================================================
// TTL
// ============================================================================

#[tokio::test(start_paused = true)]
async fn entries_expire_after_ttl() {
    let mut cache = CapabilityCache::new(CacheConfig::new().ttl(Duration::from_secs(60)));
    cache.insert(key("a"), caps(Capability::Reasoning)).unwrap();

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(cache.get(&key("a")).is_some());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(cache.get(&key("a")).is_none());
    assert_eq!(cache.stats().misses, 1);
}

// ============================================================================
// Byte budget
// ============================================================================

#[test]
fn item_sizes_match_serialized_length() {
    assert_eq!(calculate_item_size(None), 9);
    assert_eq!(calculate_item_size(Some(&Value::Null)), 4);
    assert_eq!(calculate_item_size(Some(&json!({}))), 2);
    assert_eq!(calculate_item_size(Some(&json!([]))), 2);
    assert_eq!(calculate_item_size(Some(&json!("abc"))), 5);
}

#[test]
fn budget_reduction_amount_reaches_ratio() {
    let mut budget = CacheBudget::new(10_000, 90, 70);
    budget.add_to_cache_size(9_500);
    assert!(budget.should_reduce_cache());
    assert_eq!(budget.reduction_amount(), 2_500);

    budget.remove_from_cache_size(2_500);
    assert!(!budget.should_reduce_cache());
    assert!(budget.can_add_to_cache(3_000));
    assert!(!budget.can_add_to_cache(3_001));
}

#[tokio::test]
async fn larger_sets_cost_more_bytes() {
    let mut cache = CapabilityCache::new(CacheConfig::new());
    let small = CapabilitySet::new().with(Capability::ToolUse);
    let large = small.clone().with_details(
        Capability::Reasoning,
        "2.0",
        CapabilityStrength::Advanced,
    );

    cache.insert(key("small"), small).unwrap();
    let after_small = cache.stats().bytes;
    cache.insert(key("large"), large).unwrap();

    assert!(cache.stats().bytes > 2 * after_small);
}
