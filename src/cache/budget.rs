//! Byte-budget accounting for the capability cache.

use serde::Serialize;
use serde_json::Value;

use crate::Result;

/// Size charged for an absent item (the length of `"undefined"`).
const ABSENT_ITEM_SIZE: u64 = 9;

/// Tracks the serialized size of cached items against a byte budget.
///
/// Reduction triggers once usage exceeds `reduction_threshold`% of the
/// budget and aims to bring usage down to `reduction_ratio`% of it.
#[derive(Debug, Clone)]
pub struct CacheBudget {
    max_bytes: u64,
    reduction_threshold: u8,
    reduction_ratio: u8,
    current: u64,
}

impl CacheBudget {
    /// Percentages above 100 are clamped to 100.
    pub fn new(max_bytes: u64, reduction_threshold: u8, reduction_ratio: u8) -> Self {
        Self {
            max_bytes,
            reduction_threshold: reduction_threshold.min(100),
            reduction_ratio: reduction_ratio.min(100),
            current: 0,
        }
    }

    /// Whether an item of `size` bytes fits without exceeding the budget.
    pub fn can_add_to_cache(&self, size: u64) -> bool {
        self.current.saturating_add(size) <= self.max_bytes
    }

    pub fn add_to_cache_size(&mut self, size: u64) {
        self.current = self.current.saturating_add(size);
    }

    pub fn remove_from_cache_size(&mut self, size: u64) {
        self.current = self.current.saturating_sub(size);
    }

    /// Whether usage is above the reduction threshold.
    pub fn should_reduce_cache(&self) -> bool {
        self.current > self.percent_of_max(self.reduction_threshold)
    }

    /// Bytes to evict to get down to the reduction target.
    pub fn reduction_amount(&self) -> u64 {
        self.current.saturating_sub(self.percent_of_max(self.reduction_ratio))
    }

    /// Bytes currently accounted.
    pub fn current_size(&self) -> u64 {
        self.current
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn reset(&mut self) {
        self.current = 0;
    }

    fn percent_of_max(&self, percent: u8) -> u64 {
        (u128::from(self.max_bytes) * u128::from(percent) / 100) as u64
    }
}

/// Serialized JSON length of an item.
///
/// `None` (an absent item) counts as 9 bytes, `null` as 4, and empty
/// objects or arrays as 2.
pub fn calculate_item_size(item: Option<&Value>) -> u64 {
    match item {
        None => ABSENT_ITEM_SIZE,
        Some(value) => value.to_string().len() as u64,
    }
}

/// Serialized JSON length of any serializable value.
pub fn item_size<T: Serialize + ?Sized>(item: &T) -> Result<u64> {
    Ok(serde_json::to_vec(item)?.len() as u64)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn item_sizes_for_edge_values() {
        assert_eq!(calculate_item_size(None), 9);
        assert_eq!(calculate_item_size(Some(&Value::Null)), 4);
        assert_eq!(calculate_item_size(Some(&json!({}))), 2);
        assert_eq!(calculate_item_size(Some(&json!([]))), 2);
        assert_eq!(calculate_item_size(Some(&json!({"a": 1}))), 7);
    }

    #[test]
    fn reduction_targets_ratio() {
        let mut budget = CacheBudget::new(1000, 90, 70);
        budget.add_to_cache_size(900);
        assert!(!budget.should_reduce_cache());

        budget.add_to_cache_size(50);
        assert!(budget.should_reduce_cache());
        assert_eq!(budget.reduction_amount(), 250);
    }

    #[test]
    fn can_add_respects_limit() {
        let mut budget = CacheBudget::new(100, 90, 70);
        budget.add_to_cache_size(60);
        assert!(budget.can_add_to_cache(40));
        assert!(!budget.can_add_to_cache(41));
    }

    #[test]
    fn remove_saturates_at_zero() {
        let mut budget = CacheBudget::new(100, 90, 70);
        budget.add_to_cache_size(10);
        budget.remove_from_cache_size(50);
        assert_eq!(budget.current_size(), 0);
        assert_eq!(budget.reduction_amount(), 0);
    }
}
