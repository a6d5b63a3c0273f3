//! LLM provider abstraction
//!
//! - `LlmProvider` - capability a session uses to run turns and summarize history
//! - `ScriptedProvider` - deterministic provider for tests and the demo

pub mod provider;
pub mod scripted;
pub mod types;

pub use provider::{LlmProvider, ProviderStream};
pub use scripted::{ScriptedProvider, ScriptedTurn, TurnEnd};
pub use types::{
    ContentBlock, Message, MessageContent, StreamEvent, ThinkingConfig, ToolDefinition, Usage,
};
