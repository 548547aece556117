//! In-process cache backend

use super::CacheBackend;
use std::cell::RefCell;
use std::collections::HashMap;

/// [`CacheBackend`] held in process memory
///
/// Single-threaded: interior mutability through `RefCell`.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RefCell<HashMap<(String, String), serde_json::Value>>,
    generations: RefCell<HashMap<String, u64>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached entries across all groups
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Drop every entry of one group
    pub fn flush_group(&self, group: &str) {
        self.entries.borrow_mut().retain(|(g, _), _| g != group);
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str, group: &str) -> Option<serde_json::Value> {
        self.entries
            .borrow()
            .get(&(group.to_string(), key.to_string()))
            .cloned()
    }

    fn set(&self, key: &str, value: serde_json::Value, group: &str) {
        self.entries
            .borrow_mut()
            .insert((group.to_string(), key.to_string()), value);
    }

    fn delete(&self, key: &str, group: &str) {
        self.entries
            .borrow_mut()
            .remove(&(group.to_string(), key.to_string()));
    }

    fn generation(&self, group: &str) -> u64 {
        self.generations.borrow().get(group).copied().unwrap_or(0)
    }

    fn bump_generation(&self, group: &str) -> u64 {
        let mut generations = self.generations.borrow_mut();
        let generation = generations.entry(group.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_are_separate() {
        let cache = MemoryCache::new();
        cache.set("k", serde_json::json!(1), "a");
        cache.set("k", serde_json::json!(2), "b");
        assert_eq!(cache.get("k", "a"), Some(serde_json::json!(1)));
        cache.delete("k", "a");
        assert_eq!(cache.get("k", "a"), None);
        assert_eq!(cache.get("k", "b"), Some(serde_json::json!(2)));
    }

    #[test]
    fn test_generation_counter() {
        let cache = MemoryCache::new();
        assert_eq!(cache.generation("product"), 0);
        assert_eq!(cache.bump_generation("product"), 1);
        assert_eq!(cache.bump_generation("product"), 2);
        assert_eq!(cache.generation("other"), 0);
    }

    #[test]
    fn test_flush_group() {
        let cache = MemoryCache::new();
        cache.set("x", serde_json::json!(true), "a");
        cache.set("y", serde_json::json!(true), "b");
        cache.flush_group("a");
        assert_eq!(cache.len(), 1);
    }
}
