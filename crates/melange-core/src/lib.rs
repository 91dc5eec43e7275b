//! Melange Core - on-demand module evaluation over a local socket.
//!
//! A build or preview tool asks the bridge for the current value of a module.
//! The bridge drops its cached evaluation of that module, evaluates it again
//! and answers with the value encoded as JSON, without restarting the
//! evaluating process between source changes.
//!
//! # Example
//!
//! ```rust,ignore
//! use melange_core::{BridgeConfig, BridgeServer, EvaluationResponder};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> melange_core::Result<()> {
//!     let config = BridgeConfig::default();
//!     let responder = Arc::new(EvaluationResponder::from_config(&config));
//!     let _server = BridgeServer::start(&config, responder).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod ipc;
pub mod loader;
pub mod value;

pub use cache::{MemoryModuleCache, ModuleCache};
pub use config::{BridgeConfig, ErrorPolicy, EvaluationMode, LoaderConfig};
pub use error::{BridgeError, Result};
pub use ipc::{BridgeClient, BridgeServer, BridgeServerHandle, EvaluationResponder};
pub use loader::{
    build_loader, CommandModuleLoader, EvaluationContext, JsonModuleLoader, ModuleLoader,
};
pub use value::{ModuleValue, NativeHandle};
