//! Session persistence
//!
//! This module provides the `PersistenceStore` collaborator used by session
//! actors to restore and append conversation history, along with a JSONL
//! `FileStore` and an in-memory `MemoryStore`.

pub mod envelope;
pub mod store;

pub use envelope::{EnvelopePayload, MessageEnvelope};
pub use store::{FileStore, MemoryStore, PersistenceStore, SESSIONS_DIR};
