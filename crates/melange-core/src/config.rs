//! Centralized configuration for the Melange bridge.
//!
//! Holds protocol limits, client timeouts and the runtime settings of a bridge
//! instance. A `BridgeConfig` can be built in code or loaded from a JSON file.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Where module evaluation runs relative to the connection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Evaluate on the loop thread. A slow module stalls every connection.
    #[default]
    Inline,
    /// Evaluate on the blocking pool. A slow module stalls only its own connection.
    Isolated,
}

impl EvaluationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationMode::Inline => "inline",
            EvaluationMode::Isolated => "isolated",
        }
    }
}

impl FromStr for EvaluationMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "inline" => Ok(EvaluationMode::Inline),
            "isolated" => Ok(EvaluationMode::Isolated),
            other => Err(BridgeError::Config {
                message: format!("Unknown evaluation mode: {}", other),
            }),
        }
    }
}

impl fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the producer sees when a request fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Failed requests produce no frame; the producer relies on its own timeout.
    #[default]
    Silent,
    /// Every request produces one frame carrying either a value or an error.
    Report,
}

impl ErrorPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorPolicy::Silent => "silent",
            ErrorPolicy::Report => "report",
        }
    }
}

impl FromStr for ErrorPolicy {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "silent" => Ok(ErrorPolicy::Silent),
            "report" => Ok(ErrorPolicy::Report),
            other => Err(BridgeError::Config {
                message: format!("Unknown error policy: {}", other),
            }),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which evaluation mechanism backs the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoaderConfig {
    /// JSON documents on disk, relative identifiers resolved against `root`.
    Json {
        #[serde(default)]
        root: Option<PathBuf>,
    },
    /// External program invoked with the identifier as its last argument.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        working_dir: Option<PathBuf>,
    },
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig::Json { root: None }
    }
}

/// Runtime settings of a bridge instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Unix socket path the listener binds.
    pub socket_path: PathBuf,
    pub evaluation_mode: EvaluationMode,
    pub error_policy: ErrorPolicy,
    /// Largest accepted frame payload in bytes.
    pub max_frame_size: usize,
    /// Maximum number of cached module values (`None` = unbounded).
    pub cache_capacity: Option<u64>,
    pub loader: LoaderConfig,
}

impl BridgeConfig {
    pub const SOCKET_FILE_NAME: &'static str = "melange.sock";
    pub const SOCKET_PATH_ENV: &'static str = "MELANGE_SOCKET";
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const CLIENT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const CLIENT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

    /// Default endpoint: `melange.sock` in the system temp directory.
    pub fn default_socket_path() -> PathBuf {
        std::env::temp_dir().join(Self::SOCKET_FILE_NAME)
    }

    /// Create a config for the given socket path with default settings.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Self::default()
        }
    }

    /// Take the socket path from `MELANGE_SOCKET` when it is set.
    pub fn apply_env(&mut self) {
        self.apply_socket_env(std::env::var_os(Self::SOCKET_PATH_ENV));
    }

    fn apply_socket_env(&mut self, value: Option<OsString>) {
        if let Some(path) = value.filter(|v| !v.is_empty()) {
            self.socket_path = PathBuf::from(path);
        }
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| BridgeError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| BridgeError::Config {
            message: format!("Invalid config file {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings for values the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(BridgeError::Config {
                message: "socket_path must not be empty".to_string(),
            });
        }
        if self.max_frame_size == 0 || self.max_frame_size > u32::MAX as usize {
            return Err(BridgeError::Config {
                message: format!(
                    "max_frame_size must be between 1 and {}, got {}",
                    u32::MAX,
                    self.max_frame_size
                ),
            });
        }
        if self.cache_capacity == Some(0) {
            return Err(BridgeError::Config {
                message: "cache_capacity must be positive when set".to_string(),
            });
        }
        if let LoaderConfig::Command { program, .. } = &self.loader {
            if program.trim().is_empty() {
                return Err(BridgeError::Config {
                    message: "command loader requires a program".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: Self::default_socket_path(),
            evaluation_mode: EvaluationMode::default(),
            error_policy: ErrorPolicy::default(),
            max_frame_size: Self::MAX_FRAME_SIZE,
            cache_capacity: None,
            loader: LoaderConfig::default(),
        }
    }
}
