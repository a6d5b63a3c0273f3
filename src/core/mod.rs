//! Core types for the session runtime
//!
//! This module provides the fundamental types used throughout the crate:
//! - `SessionStatus` - Execution status of a session
//! - `OutputChunk` / `SessionCommand` - Communication types
//! - `TokenState` - Context occupancy used by the compaction policy
//! - `SessionRole` - Watcher roles
//! - `RuntimeError` - Error types

pub mod error;
pub mod output;
pub mod role;
pub mod state;
pub(crate) mod sync;
pub mod tokens;

pub use error::{CompactionError, RuntimeError, RuntimeResult};
pub use output::{OutputChunk, SessionCommand, WatcherMessage};
pub use role::{RoleAuthority, SessionRole};
pub use state::SessionStatus;
pub use tokens::TokenState;

/// Identifier of a session inside one registry
pub type SessionId = uuid::Uuid;
