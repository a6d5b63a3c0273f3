//! Conversation types exchanged with LLM providers

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{OutputChunk, TokenState};

// ============================================================================
// Request Types
// ============================================================================

/// Extended thinking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingConfig {
    /// Type of thinking ("enabled")
    #[serde(rename = "type")]
    pub thinking_type: String,

    /// Budget tokens for thinking
    pub budget_tokens: u32,
}

impl ThinkingConfig {
    /// Create a new thinking config with enabled thinking
    pub fn enabled(budget_tokens: u32) -> Self {
        Self {
            thinking_type: "enabled".to_string(),
            budget_tokens,
        }
    }
}

/// Tool advertised to the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,
    /// What the tool does
    pub description: String,
    /// JSON schema of the tool input
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Create a tool definition
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender ("user" or "assistant")
    pub role: String,

    /// Content of the message - can be a string or array of content blocks
    pub content: MessageContent,
}

/// Message content - either a simple string or array of content blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content
    Text(String),
    /// Array of content blocks (for tool use and tool results)
    Blocks(Vec<ContentBlock>),
}

impl Message {
    /// Create a simple user message with text content
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    /// Create a simple assistant message with text content
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    /// Create an assistant message with content blocks (for tool use)
    pub fn assistant_with_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Check if this message was sent by the user
    pub fn is_user(&self) -> bool {
        self.role == "user"
    }

    /// Check if this message was sent by the assistant
    pub fn is_assistant(&self) -> bool {
        self.role == "assistant"
    }

    /// Get content blocks if this message has blocks
    pub fn blocks(&self) -> Option<&[ContentBlock]> {
        match &self.content {
            MessageContent::Text(_) => None,
            MessageContent::Blocks(blocks) => Some(blocks),
        }
    }

    /// All text in the message, with text blocks joined by newlines
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Every piece of text the model would read, tool traffic included
    pub fn rendered_len(&self) -> usize {
        match &self.content {
            MessageContent::Text(s) => s.len(),
            MessageContent::Blocks(blocks) => blocks.iter().map(ContentBlock::rendered_len).sum(),
        }
    }
}

// ============================================================================
// Content Blocks
// ============================================================================

/// Content block in a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    /// Text content
    #[serde(rename = "text")]
    Text { text: String },

    /// Tool invocation by the model
    #[serde(rename = "tool_use")]
    ToolUse { name: String, input: Value },

    /// Output of a tool invocation
    #[serde(rename = "tool_result")]
    ToolResult { name: String, content: String },
}

impl ContentBlock {
    /// Create a text content block
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Create a tool use content block
    pub fn tool_use(name: impl Into<String>, input: Value) -> Self {
        ContentBlock::ToolUse {
            name: name.into(),
            input,
        }
    }

    /// Create a tool result content block
    pub fn tool_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        ContentBlock::ToolResult {
            name: name.into(),
            content: content.into(),
        }
    }

    fn rendered_len(&self) -> usize {
        match self {
            ContentBlock::Text { text } => text.len(),
            ContentBlock::ToolUse { name, input } => name.len() + input.to_string().len(),
            ContentBlock::ToolResult { name, content } => name.len() + content.len(),
        }
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// Token usage reported by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens
    pub input_tokens: u64,
    /// Output tokens
    pub output_tokens: u64,
    /// Input tokens read from cache
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl From<Usage> for TokenState {
    fn from(usage: Usage) -> Self {
        TokenState::new(
            usage.input_tokens,
            usage.cache_read_input_tokens,
            usage.output_tokens,
        )
    }
}

/// Events yielded by a provider stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// An output item for the session
    Chunk(OutputChunk),
    /// Token usage for the request
    Usage(Usage),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_text() {
        assert_eq!(Message::user("hello").text(), "hello");
        let msg = Message::assistant_with_blocks(vec![
            ContentBlock::text("first"),
            ContentBlock::tool_use("Read", serde_json::json!({"path": "a.rs"})),
            ContentBlock::text("second"),
        ]);
        assert_eq!(msg.text(), "first\nsecond");
        assert!(msg.is_assistant());
        assert_eq!(msg.blocks().map(|b| b.len()), Some(3));
    }

    #[test]
    fn test_message_serde() {
        let msg = Message::assistant_with_blocks(vec![ContentBlock::tool_result("Read", "ok")]);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"tool_result""#));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);

        let simple: Message = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(simple, Message::user("hi"));
    }

    #[test]
    fn test_usage_into_tokens() {
        let usage = Usage {
            input_tokens: 10,
            output_tokens: 5,
            cache_read_input_tokens: 3,
        };
        let tokens: TokenState = usage.into();
        assert_eq!(tokens.total(), 18);
        assert_eq!(tokens.cache_read_tokens, 3);
    }
}
