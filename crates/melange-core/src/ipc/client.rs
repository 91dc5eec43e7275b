//! Producer-side client for the bridge.
//!
//! Connects to a bridge socket, sends module identifiers and decodes the
//! replies. Under the silent error policy a failed request produces no frame,
//! so the client's response timeout is the only failure signal. A reply that
//! arrives after its request timed out would be read as the answer to the
//! next request; reconnect after a timeout if the module may still be
//! evaluating.
//!
//! # Thread Safety
//!
//! The stream sits behind a tokio `Mutex`, so one request is in flight per
//! client at a time.

use super::protocol::{read_frame, write_frame, DecodedReply};
use crate::config::{BridgeConfig, ErrorPolicy};
use crate::error::{BridgeError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::debug;

/// Client connected to a bridge server.
#[derive(Debug)]
pub struct BridgeClient {
    stream: Mutex<UnixStream>,
    path: PathBuf,
    policy: ErrorPolicy,
    response_timeout: Duration,
    max_frame_size: usize,
}

impl BridgeClient {
    /// Connect to a bridge socket.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let stream = tokio::time::timeout(
            BridgeConfig::CLIENT_CONNECT_TIMEOUT,
            UnixStream::connect(&path),
        )
        .await
        .map_err(|_| BridgeError::Timeout(BridgeConfig::CLIENT_CONNECT_TIMEOUT))?
        .map_err(|e| BridgeError::Transport {
            message: format!("Failed to connect to {}: {}", path.display(), e),
            source: Some(e),
        })?;

        debug!("Bridge client connected to {}", path.display());

        Ok(Self {
            stream: Mutex::new(stream),
            path,
            policy: ErrorPolicy::default(),
            response_timeout: BridgeConfig::CLIENT_RESPONSE_TIMEOUT,
            max_frame_size: BridgeConfig::MAX_FRAME_SIZE,
        })
    }

    /// Error policy the server runs with; decides how replies are decoded.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send an identifier and return the raw response payload.
    pub async fn request_raw(&self, identifier: &str) -> Result<Vec<u8>> {
        let mut stream = self.stream.lock().await;
        let (mut reader, mut writer) = stream.split();

        write_frame(&mut writer, identifier.as_bytes()).await?;

        tokio::time::timeout(
            self.response_timeout,
            read_frame(&mut reader, self.max_frame_size),
        )
        .await
        .map_err(|_| BridgeError::Timeout(self.response_timeout))??
        .ok_or_else(|| BridgeError::Transport {
            message: "bridge closed the connection".to_string(),
            source: None,
        })
    }

    /// Evaluate a module through the bridge and decode its value.
    pub async fn evaluate(&self, identifier: &str) -> Result<serde_json::Value> {
        let payload = self.request_raw(identifier).await?;

        match self.policy {
            ErrorPolicy::Silent => Ok(serde_json::from_slice(&payload)?),
            ErrorPolicy::Report => match serde_json::from_slice::<DecodedReply>(&payload)? {
                DecodedReply::Value(value) => Ok(value),
                DecodedReply::Error(err) => Err(err.into_error()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryModuleCache;
    use crate::ipc::responder::EvaluationResponder;
    use crate::ipc::server::BridgeServer;
    use crate::loader::{EvaluationContext, ModuleLoader};
    use crate::value::{ModuleValue, NativeHandle};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct FixedLoader;

    impl ModuleLoader for FixedLoader {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn evaluate(
            &self,
            identifier: &str,
            _ctx: &mut EvaluationContext<'_>,
        ) -> Result<ModuleValue> {
            match identifier {
                "page" => Ok(ModuleValue::object([("title", ModuleValue::from("Home"))])),
                "handle" => Ok(ModuleValue::Handle(NativeHandle::new("fd", 1))),
                _ => Err(BridgeError::resolution(identifier, "no such module")),
            }
        }
    }

    async fn start(dir: &TempDir, policy: ErrorPolicy) -> crate::ipc::BridgeServerHandle {
        let config = BridgeConfig::new(dir.path().join("bridge.sock"));
        let responder =
            EvaluationResponder::new(Arc::new(FixedLoader), Arc::new(MemoryModuleCache::new()))
                .with_error_policy(policy);
        BridgeServer::start(&config, Arc::new(responder)).await.unwrap()
    }

    #[tokio::test]
    async fn test_client_evaluate_success() {
        let dir = TempDir::new().unwrap();
        let handle = start(&dir, ErrorPolicy::Silent).await;

        let client = BridgeClient::connect(handle.path()).await.unwrap();
        let value = client.evaluate("page").await.unwrap();
        assert_eq!(value, serde_json::json!({"title": "Home"}));
    }

    #[tokio::test]
    async fn test_client_times_out_on_silent_failure() {
        let dir = TempDir::new().unwrap();
        let handle = start(&dir, ErrorPolicy::Silent).await;

        let client = BridgeClient::connect(handle.path())
            .await
            .unwrap()
            .with_response_timeout(Duration::from_millis(200));

        match client.evaluate("missing").await {
            Err(BridgeError::Timeout(d)) => assert_eq!(d, Duration::from_millis(200)),
            other => panic!("Expected Timeout, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_decodes_reported_errors() {
        let dir = TempDir::new().unwrap();
        let handle = start(&dir, ErrorPolicy::Report).await;

        let client = BridgeClient::connect(handle.path())
            .await
            .unwrap()
            .with_error_policy(ErrorPolicy::Report);

        match client.evaluate("missing").await {
            Err(BridgeError::Resolution { identifier, .. }) => assert_eq!(identifier, "missing"),
            other => panic!("Expected Resolution, got: {:?}", other),
        }
        match client.evaluate("handle").await {
            Err(BridgeError::Serialization { identifier, .. }) => assert_eq!(identifier, "handle"),
            other => panic!("Expected Serialization, got: {:?}", other),
        }
        assert_eq!(
            client.evaluate("page").await.unwrap(),
            serde_json::json!({"title": "Home"})
        );
    }

    #[tokio::test]
    async fn test_client_connect_to_missing_socket_fails() {
        let dir = TempDir::new().unwrap();
        let result = BridgeClient::connect(dir.path().join("nobody.sock")).await;
        assert_eq!(result.unwrap_err().kind(), "transport");
    }

    #[tokio::test]
    async fn test_client_detects_server_shutdown() {
        let dir = TempDir::new().unwrap();
        let mut handle = start(&dir, ErrorPolicy::Silent).await;

        let client = BridgeClient::connect(handle.path())
            .await
            .unwrap()
            .with_response_timeout(Duration::from_millis(500));
        assert!(client.evaluate("page").await.is_ok());

        handle.shutdown();

        let mut detected_shutdown = false;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if client.evaluate("page").await.is_err() {
                detected_shutdown = true;
                break;
            }
        }
        assert!(detected_shutdown, "Client should detect server shutdown");
    }
}
