//! Local IPC between a build tool and the bridge.
//!
//! A producer connects to the bridge's Unix socket and sends module
//! identifiers as length-prefixed frames. For each one the bridge evicts the
//! cached value, evaluates the module again and writes back its JSON
//! encoding.
//!
//! # Architecture
//!
//! - **Server**: binds the socket, accepts connections, one task per connection
//! - **Responder**: invalidate, evaluate, serialize for each request
//! - **Client**: producer-side helper used by the CLI and tests
//! - **Protocol**: framing and reply types shared by both sides

pub mod client;
pub mod protocol;
pub mod responder;
pub mod server;

pub use client::BridgeClient;
pub use protocol::{DecodedReply, ErrorPayload, Reply};
pub use responder::EvaluationResponder;
pub use server::{BridgeServer, BridgeServerHandle};
