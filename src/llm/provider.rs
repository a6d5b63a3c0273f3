//! LLM Provider trait
//!
//! Abstracts the LLM interface so that session actors never depend on a
//! specific backend.

use anyhow::Result;
use futures::stream::Stream;
use std::pin::Pin;

use super::types::{Message, StreamEvent, ThinkingConfig, ToolDefinition};

/// Stream of events for a single provider request
pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Trait for LLM providers that drive session turns.
///
/// A stream ends after yielding either a `FinalResponse` or an `Error` chunk,
/// or by yielding an `Err` item. Dropping the stream abandons the request.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a turn over the full conversation history.
    async fn stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        thinking: Option<ThinkingConfig>,
    ) -> Result<ProviderStream>;

    /// Produce a plain-text summary for the given prompt.
    ///
    /// Used by compaction to condense older turns.
    async fn summarize(&self, prompt: &str) -> Result<String>;

    /// Get the current model name.
    fn model(&self) -> String;

    /// Get the provider name (e.g., "anthropic", "scripted").
    fn provider_name(&self) -> &str;
}
