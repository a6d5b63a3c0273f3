//! Background agent sessions
//!
//! Sessions run as independent tokio tasks. Each one buffers its output,
//! hands it to an optional attached observer and fans it out to watchers.
//! Watcher sessions evaluate their parent's output and can inject messages
//! back into it. Histories are compacted when the context fills up.

pub mod core;
pub mod runtime;
pub mod session;

pub mod compaction;
pub mod config;
pub mod llm;
pub mod logging;

// Optional components
pub mod cli;

pub use crate::config::RuntimeConfig;
pub use crate::core::{
    OutputChunk, RoleAuthority, RuntimeError, RuntimeResult, SessionId, SessionRole,
    SessionStatus, TokenState,
};
pub use crate::runtime::{Observer, SessionHandle, SessionInfo, SessionRegistry, WatchStream};
