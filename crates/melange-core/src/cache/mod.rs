//! Module cache for the bridge.
//!
//! The responder owns one `ModuleCache` and enforces the invalidate-then-fill
//! protocol on it. Loaders only reach the cache through an evaluation context,
//! to reuse values of imported modules.

mod memory;
mod traits;

pub use memory::MemoryModuleCache;
pub use traits::ModuleCache;
