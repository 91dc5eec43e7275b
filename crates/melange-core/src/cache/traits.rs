//! Module cache trait.

use crate::value::ModuleValue;
use std::sync::Arc;

/// Store of evaluated module values keyed by module identifier.
///
/// Implementations use interior mutability; the cache is shared between the
/// responder and evaluation tasks.
pub trait ModuleCache: Send + Sync {
    /// Get the cached value for an identifier.
    fn get(&self, identifier: &str) -> Option<Arc<ModuleValue>>;

    /// Store a value, replacing any existing entry.
    fn insert(&self, identifier: &str, value: Arc<ModuleValue>);

    /// Evict an identifier. Returns whether an entry was present.
    fn invalidate(&self, identifier: &str) -> bool;

    fn contains(&self, identifier: &str) -> bool {
        self.get(identifier).is_some()
    }
}
