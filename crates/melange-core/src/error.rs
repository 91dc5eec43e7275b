//! Error types for the Melange bridge.
//!
//! Errors fall in two groups. Request-local errors (resolution, serialization,
//! validation) abort a single request and leave the connection open.
//! Connection-level errors (transport, framing) end the connection they
//! occurred on and nothing else.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // Startup errors
    #[error("Failed to bind endpoint {path:?}: {message}")]
    Bind {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // Request errors
    #[error("Failed to resolve module {identifier}: {message}")]
    Resolution { identifier: String, message: String },

    #[error("Failed to serialize module {identifier}: {message}")]
    Serialization { identifier: String, message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Connection errors
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Frame of {size} bytes exceeds maximum {max}")]
    Frame { size: usize, max: usize },

    // Client errors
    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Transport {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl BridgeError {
    /// Create a resolution error for a module identifier.
    pub fn resolution(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::Resolution {
            identifier: identifier.into(),
            message: message.into(),
        }
    }

    /// Create a bind error with path context.
    pub fn bind(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        BridgeError::Bind {
            path: path.into(),
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Stable kind name used in error replies.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Bind { .. } => "bind",
            BridgeError::Config { .. } => "config",
            BridgeError::Resolution { .. } => "resolution",
            BridgeError::Serialization { .. } => "serialization",
            BridgeError::Validation { .. } => "validation",
            BridgeError::Transport { .. } => "transport",
            BridgeError::Frame { .. } => "frame",
            BridgeError::Timeout(_) => "timeout",
            BridgeError::Json { .. } => "json",
            BridgeError::Other(_) => "other",
        }
    }

    /// Whether the error only aborts the current request.
    ///
    /// Connections survive request-local errors; anything else ends the
    /// connection it happened on.
    pub fn is_request_local(&self) -> bool {
        matches!(
            self,
            BridgeError::Resolution { .. }
                | BridgeError::Serialization { .. }
                | BridgeError::Validation { .. }
        )
    }
}
