//! Evaluation responder.
//!
//! Turns one request frame into at most one response payload:
//! invalidate the cached value, evaluate the module again, fill the cache,
//! serialize. Failures abort the request only; under the silent policy they
//! produce no payload at all, under the report policy an error reply.

use super::protocol::{decode_identifier, ErrorPayload, Reply};
use crate::cache::{MemoryModuleCache, ModuleCache};
use crate::config::{BridgeConfig, ErrorPolicy, EvaluationMode};
use crate::error::{BridgeError, Result};
use crate::loader::{build_loader, EvaluationContext, ModuleLoader};
use crate::value::ModuleValue;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handles requests for one bridge instance.
///
/// Owns the module cache it enforces the invalidate-then-fill protocol on.
/// Share it between connections with an `Arc`.
pub struct EvaluationResponder {
    loader: Arc<dyn ModuleLoader>,
    cache: Arc<dyn ModuleCache>,
    mode: EvaluationMode,
    policy: ErrorPolicy,
}

impl EvaluationResponder {
    /// Create a responder with inline evaluation and the silent policy.
    pub fn new(loader: Arc<dyn ModuleLoader>, cache: Arc<dyn ModuleCache>) -> Self {
        Self {
            loader,
            cache,
            mode: EvaluationMode::default(),
            policy: ErrorPolicy::default(),
        }
    }

    /// Create a responder with a fresh cache and the loader from `config`.
    pub fn from_config(config: &BridgeConfig) -> Self {
        let cache: Arc<dyn ModuleCache> = match config.cache_capacity {
            Some(capacity) => Arc::new(MemoryModuleCache::with_capacity(capacity)),
            None => Arc::new(MemoryModuleCache::new()),
        };
        Self::new(build_loader(&config.loader), cache)
            .with_mode(config.evaluation_mode)
            .with_error_policy(config.error_policy)
    }

    pub fn with_mode(mut self, mode: EvaluationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.policy
    }

    pub fn cache(&self) -> &Arc<dyn ModuleCache> {
        &self.cache
    }

    pub fn loader_name(&self) -> &'static str {
        self.loader.name()
    }

    /// Evaluate a module from scratch and cache the new value.
    ///
    /// The identifier is mapped to the loader's canonical key, and the cached
    /// entry for that key is evicted before the loader runs. A panicking
    /// loader fails the request with a resolution error in either mode.
    pub async fn evaluate(&self, identifier: &str) -> Result<Arc<ModuleValue>> {
        let key = self.loader.canonical_identifier(identifier);
        let evicted = self.cache.invalidate(&key);
        self.loader.evict(&key);
        debug!(
            "Evaluating {} ({} mode, evicted cached value: {})",
            key, self.mode, evicted
        );

        let value = match self.mode {
            EvaluationMode::Inline => run_loader(self.loader.as_ref(), self.cache.as_ref(), &key)?,
            EvaluationMode::Isolated => {
                let loader = Arc::clone(&self.loader);
                let cache = Arc::clone(&self.cache);
                let id = key.clone();
                tokio::task::spawn_blocking(move || {
                    run_loader(loader.as_ref(), cache.as_ref(), &id)
                })
                .await
                .map_err(|e| {
                    BridgeError::resolution(&key, format!("evaluation task failed: {}", e))
                })??
            }
        };

        debug!("Evaluated {} to {}", key, value.type_name());
        let value = Arc::new(value);
        self.cache.insert(&key, Arc::clone(&value));
        Ok(value)
    }

    /// Encode a value as a response payload for the configured policy.
    pub fn serialize(&self, identifier: &str, value: &ModuleValue) -> Result<Vec<u8>> {
        let encoded = match self.policy {
            ErrorPolicy::Silent => value.to_json_vec(),
            ErrorPolicy::Report => serde_json::to_vec(&Reply::Value(value)),
        };
        encoded.map_err(|e| BridgeError::Serialization {
            identifier: identifier.to_string(),
            message: e.to_string(),
        })
    }

    /// Run the full request pipeline for one frame.
    ///
    /// Returns the payload to write, or `None` when nothing is written.
    pub async fn respond(&self, frame: &[u8]) -> Option<Vec<u8>> {
        let identifier = match decode_identifier(frame) {
            Ok(identifier) => identifier,
            Err(e) => return self.on_failure("", e),
        };

        let result = match self.evaluate(&identifier).await {
            Ok(value) => self.serialize(&identifier, &value),
            Err(e) => Err(e),
        };

        match result {
            Ok(payload) => {
                debug!("Answering {} with {} bytes", identifier, payload.len());
                Some(payload)
            }
            Err(e) => self.on_failure(&identifier, e),
        }
    }

    fn on_failure(&self, identifier: &str, err: BridgeError) -> Option<Vec<u8>> {
        warn!("Request for {:?} failed: {}", identifier, err);
        match self.policy {
            ErrorPolicy::Silent => None,
            ErrorPolicy::Report => {
                let reply = Reply::Error(ErrorPayload::from_error(identifier, &err));
                serde_json::to_vec(&reply).ok()
            }
        }
    }
}

/// Run the loader for one module, turning a panic into a resolution error.
fn run_loader(
    loader: &dyn ModuleLoader,
    cache: &dyn ModuleCache,
    identifier: &str,
) -> Result<ModuleValue> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut ctx = EvaluationContext::new(cache, identifier);
        loader.evaluate(identifier, &mut ctx)
    }));
    outcome.unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(BridgeError::resolution(
            identifier,
            format!("evaluation panicked: {}", reason),
        ))
    })
}

impl std::fmt::Debug for EvaluationResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationResponder")
            .field("loader", &self.loader.name())
            .field("mode", &self.mode)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::DecodedReply;
    use crate::value::NativeHandle;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Loader backed by an in-memory table that records what it saw in the cache.
    #[derive(Default)]
    struct TableLoader {
        modules: Mutex<HashMap<String, ModuleValue>>,
        saw_cached_self: Mutex<Vec<bool>>,
        evicted: Mutex<Vec<String>>,
    }

    impl TableLoader {
        fn set(&self, id: &str, value: ModuleValue) {
            self.modules.lock().unwrap().insert(id.to_string(), value);
        }
    }

    impl ModuleLoader for TableLoader {
        fn name(&self) -> &'static str {
            "table"
        }

        fn evict(&self, identifier: &str) {
            self.evicted.lock().unwrap().push(identifier.to_string());
        }

        fn evaluate(
            &self,
            identifier: &str,
            ctx: &mut EvaluationContext<'_>,
        ) -> Result<ModuleValue> {
            if identifier == "panics" {
                panic!("loader bug");
            }
            self.saw_cached_self
                .lock()
                .unwrap()
                .push(ctx.cached(identifier).is_some());
            self.modules
                .lock()
                .unwrap()
                .get(identifier)
                .cloned()
                .ok_or_else(|| BridgeError::resolution(identifier, "no such module"))
        }
    }

    fn responder(loader: Arc<TableLoader>) -> EvaluationResponder {
        EvaluationResponder::new(loader, Arc::new(MemoryModuleCache::new()))
    }

    #[tokio::test]
    async fn test_respond_returns_serialized_value() {
        let loader = Arc::new(TableLoader::default());
        loader.set("a/b.mod", ModuleValue::Integer(3));
        let responder = responder(loader);

        let payload = responder.respond(b"a/b.mod").await.unwrap();
        assert_eq!(payload, b"3");
        assert!(responder.cache().contains("a/b.mod"));
    }

    #[tokio::test]
    async fn test_evaluation_never_sees_own_cached_value() {
        let loader = Arc::new(TableLoader::default());
        loader.set("m", ModuleValue::Integer(1));
        let responder = responder(loader.clone());

        responder.respond(b"m").await.unwrap();
        loader.set("m", ModuleValue::Integer(2));
        let payload = responder.respond(b"m").await.unwrap();

        assert_eq!(payload, b"2");
        assert_eq!(*loader.saw_cached_self.lock().unwrap(), vec![false, false]);
        assert_eq!(*loader.evicted.lock().unwrap(), vec!["m".to_string(), "m".to_string()]);
    }

    #[tokio::test]
    async fn test_isolated_mode_evaluates_on_blocking_pool() {
        let loader = Arc::new(TableLoader::default());
        loader.set("m", ModuleValue::from("isolated"));
        let responder = responder(loader).with_mode(EvaluationMode::Isolated);

        let value = responder.evaluate("m").await.unwrap();
        assert_eq!(*value, ModuleValue::from("isolated"));
        assert!(responder.cache().contains("m"));
    }

    #[tokio::test]
    async fn test_silent_policy_drops_failures() {
        let loader = Arc::new(TableLoader::default());
        loader.set("handle", ModuleValue::Handle(NativeHandle::new("fd", 3)));
        let responder = responder(loader);

        assert!(responder.respond(b"missing").await.is_none());
        assert!(responder.respond(b"handle").await.is_none());
        assert!(responder.respond(&[0xc3, 0x28]).await.is_none());
        assert!(responder.respond(b"").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_evaluation_leaves_no_cache_entry() {
        let loader = Arc::new(TableLoader::default());
        loader.set("m", ModuleValue::Integer(1));
        let responder = responder(loader.clone());

        responder.respond(b"m").await.unwrap();
        loader.modules.lock().unwrap().clear();

        assert!(responder.respond(b"m").await.is_none());
        assert!(!responder.cache().contains("m"));
    }

    #[tokio::test]
    async fn test_report_policy_wraps_values_and_errors() {
        let loader = Arc::new(TableLoader::default());
        loader.set("ok", ModuleValue::Bool(true));
        loader.set("handle", ModuleValue::Handle(NativeHandle::new("fd", 3)));
        let responder = responder(loader).with_error_policy(ErrorPolicy::Report);

        let payload = responder.respond(b"ok").await.unwrap();
        let reply: DecodedReply = serde_json::from_slice(&payload).unwrap();
        assert_eq!(reply, DecodedReply::Value(serde_json::json!(true)));

        let payload = responder.respond(b"missing").await.unwrap();
        match serde_json::from_slice::<DecodedReply>(&payload).unwrap() {
            DecodedReply::Error(err) => {
                assert_eq!(err.kind, "resolution");
                assert_eq!(err.identifier, "missing");
            }
            other => panic!("Expected error reply, got: {:?}", other),
        }

        let payload = responder.respond(b"handle").await.unwrap();
        match serde_json::from_slice::<DecodedReply>(&payload).unwrap() {
            DecodedReply::Error(err) => assert_eq!(err.kind, "serialization"),
            other => panic!("Expected error reply, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_serialization_failure_still_caches_value() {
        let loader = Arc::new(TableLoader::default());
        loader.set("handle", ModuleValue::Handle(NativeHandle::new("fd", 3)));
        let responder = responder(loader);

        let value = responder.evaluate("handle").await.unwrap();
        let err = responder.serialize("handle", &value).unwrap_err();

        assert_eq!(err.kind(), "serialization");
        assert!(responder.cache().contains("handle"));
    }

    #[tokio::test]
    async fn test_panicking_loader_fails_request_in_both_modes() {
        for mode in [EvaluationMode::Inline, EvaluationMode::Isolated] {
            let loader = Arc::new(TableLoader::default());
            loader.set("m", ModuleValue::Integer(1));
            let responder = responder(loader)
                .with_mode(mode)
                .with_error_policy(ErrorPolicy::Report);

            let payload = responder.respond(b"panics").await.unwrap();
            match serde_json::from_slice::<DecodedReply>(&payload).unwrap() {
                DecodedReply::Error(err) => {
                    assert_eq!(err.kind, "resolution", "{} mode", mode);
                    assert!(!responder.cache().contains("panics"));
                }
                other => panic!("Expected error reply in {} mode, got: {:?}", mode, other),
            }

            assert_eq!(responder.respond(b"m").await.unwrap(), b"{\"value\":1}");
        }
    }

    #[tokio::test]
    async fn test_cache_uses_loader_canonical_key() {
        struct CaseLoader;

        impl ModuleLoader for CaseLoader {
            fn name(&self) -> &'static str {
                "case"
            }

            fn canonical_identifier(&self, identifier: &str) -> String {
                identifier.to_ascii_lowercase()
            }

            fn evaluate(
                &self,
                identifier: &str,
                _ctx: &mut EvaluationContext<'_>,
            ) -> Result<ModuleValue> {
                Ok(ModuleValue::from(identifier))
            }
        }

        let responder = EvaluationResponder::new(
            Arc::new(CaseLoader),
            Arc::new(MemoryModuleCache::new()),
        );
        responder.cache().insert("page", Arc::new(ModuleValue::Null));

        let value = responder.evaluate("PAGE").await.unwrap();
        assert_eq!(*value, ModuleValue::from("page"));
        assert!(!responder.cache().contains("PAGE"));
        assert_eq!(
            responder.cache().get("page").as_deref(),
            Some(&ModuleValue::from("page"))
        );
    }
}
