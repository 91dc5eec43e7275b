//! In-memory module cache backed by `mini-moka`.

use super::traits::ModuleCache;
use crate::value::ModuleValue;
use mini_moka::sync::Cache;
use std::sync::Arc;

/// Process-local module cache.
///
/// Unbounded by default: entries stay until invalidated or the cache is
/// dropped. With a capacity, `mini-moka` evicts the least useful entries once
/// the bound is exceeded.
#[derive(Clone)]
pub struct MemoryModuleCache {
    entries: Cache<String, Arc<ModuleValue>>,
}

impl MemoryModuleCache {
    /// Create an unbounded cache.
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().build(),
        }
    }

    /// Create a cache holding at most `max_entries` values.
    pub fn with_capacity(max_entries: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(max_entries).build(),
        }
    }
}

impl Default for MemoryModuleCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryModuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryModuleCache")
            .field("entry_count", &self.entries.entry_count())
            .finish()
    }
}

impl ModuleCache for MemoryModuleCache {
    // Keys are `Arc<String>` inside mini-moka, which only borrows as `String`.
    fn get(&self, identifier: &str) -> Option<Arc<ModuleValue>> {
        self.entries.get(&identifier.to_string())
    }

    fn insert(&self, identifier: &str, value: Arc<ModuleValue>) {
        self.entries.insert(identifier.to_string(), value);
    }

    fn invalidate(&self, identifier: &str) -> bool {
        let key = identifier.to_string();
        let present = self.entries.contains_key(&key);
        if present {
            self.entries.invalidate(&key);
        }
        present
    }

    fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(&identifier.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_invalidate() {
        let cache = MemoryModuleCache::new();
        assert!(cache.get("a/b.mod").is_none());

        cache.insert("a/b.mod", Arc::new(ModuleValue::Integer(3)));
        assert_eq!(cache.get("a/b.mod").as_deref(), Some(&ModuleValue::Integer(3)));
        assert!(cache.contains("a/b.mod"));

        assert!(cache.invalidate("a/b.mod"));
        assert!(cache.get("a/b.mod").is_none());
        assert!(!cache.invalidate("a/b.mod"));
    }

    #[test]
    fn test_insert_replaces_entry() {
        let cache = MemoryModuleCache::new();
        cache.insert("m", Arc::new(ModuleValue::Integer(1)));
        cache.insert("m", Arc::new(ModuleValue::Integer(2)));
        assert_eq!(cache.get("m").as_deref(), Some(&ModuleValue::Integer(2)));
    }

    #[test]
    fn test_invalidate_touches_only_its_key() {
        let cache = MemoryModuleCache::new();
        cache.insert("x", Arc::new(ModuleValue::Null));
        cache.insert("y", Arc::new(ModuleValue::Bool(true)));

        assert!(cache.invalidate("x"));

        assert!(!cache.contains("x"));
        assert!(cache.contains("y"));
        assert!(!cache.invalidate("x"));
    }

    #[test]
    fn test_clones_share_entries() {
        let cache = MemoryModuleCache::with_capacity(16);
        let other = cache.clone();
        cache.insert("shared", Arc::new(ModuleValue::from("v")));
        assert!(other.contains("shared"));
    }
}
