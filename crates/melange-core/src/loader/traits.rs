//! Module loader trait and evaluation context.

use crate::cache::ModuleCache;
use crate::error::{BridgeError, Result};
use crate::value::ModuleValue;
use std::sync::Arc;

/// Evaluation mechanism behind the bridge.
///
/// `evaluate` is synchronous and may have arbitrary side effects. The
/// responder decides whether it runs inline on the connection loop or on the
/// blocking pool.
pub trait ModuleLoader: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Canonical spelling of an identifier, used as its cache key.
    ///
    /// Every spelling of the same module must map to the same key, so that
    /// invalidating it is visible to every module that imports it.
    fn canonical_identifier(&self, identifier: &str) -> String {
        identifier.to_string()
    }

    /// Drop any state the loader keeps for an identifier.
    ///
    /// Called after the cache entry is evicted and before `evaluate`.
    fn evict(&self, _identifier: &str) {}

    /// Resolve and evaluate a module.
    fn evaluate(&self, identifier: &str, ctx: &mut EvaluationContext<'_>) -> Result<ModuleValue>;
}

/// Per-request view of the module cache handed to a loader.
///
/// Tracks the chain of modules being evaluated so loaders that follow imports
/// can detect cycles.
pub struct EvaluationContext<'a> {
    cache: &'a dyn ModuleCache,
    stack: Vec<String>,
}

impl<'a> EvaluationContext<'a> {
    /// Start a context for a request of `root`.
    pub fn new(cache: &'a dyn ModuleCache, root: &str) -> Self {
        Self {
            cache,
            stack: vec![root.to_string()],
        }
    }

    /// The identifier the request was made for.
    pub fn root(&self) -> &str {
        self.stack.first().map(String::as_str).unwrap_or_default()
    }

    /// Number of modules currently being evaluated.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Cached value of a dependency, if any.
    pub fn cached(&self, identifier: &str) -> Option<Arc<ModuleValue>> {
        self.cache.get(identifier)
    }

    /// Store the value of a dependency evaluated during this request.
    pub fn remember(&self, identifier: &str, value: Arc<ModuleValue>) {
        self.cache.insert(identifier, value);
    }

    /// Mark a dependency as being evaluated.
    ///
    /// Fails when the dependency is already on the evaluation chain.
    pub fn enter(&mut self, identifier: &str) -> Result<()> {
        if self.stack.iter().any(|active| active == identifier) {
            let mut chain = self.stack.clone();
            chain.push(identifier.to_string());
            return Err(BridgeError::resolution(
                self.root().to_string(),
                format!("import cycle: {}", chain.join(" -> ")),
            ));
        }
        self.stack.push(identifier.to_string());
        Ok(())
    }

    /// Leave the most recently entered dependency.
    pub fn leave(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryModuleCache;

    #[test]
    fn test_enter_detects_cycle() {
        let cache = MemoryModuleCache::new();
        let mut ctx = EvaluationContext::new(&cache, "a");

        ctx.enter("b").unwrap();
        assert_eq!(ctx.depth(), 2);

        match ctx.enter("a") {
            Err(BridgeError::Resolution { identifier, message }) => {
                assert_eq!(identifier, "a");
                assert_eq!(message, "import cycle: a -> b -> a");
            }
            other => panic!("Expected Resolution, got: {:?}", other),
        }

        ctx.leave();
        ctx.leave();
        assert_eq!(ctx.depth(), 1);
        assert_eq!(ctx.root(), "a");
    }

    #[test]
    fn test_remember_writes_through_to_cache() {
        let cache = MemoryModuleCache::new();
        let ctx = EvaluationContext::new(&cache, "root");

        ctx.remember("dep", Arc::new(ModuleValue::Integer(9)));
        assert_eq!(ctx.cached("dep").as_deref(), Some(&ModuleValue::Integer(9)));
        assert!(cache.contains("dep"));
    }
}
