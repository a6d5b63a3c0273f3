//! Input and output message types for session communication

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use super::error::RuntimeResult;
use super::role::SessionRole;
use super::tokens::TokenState;
use super::SessionId;
use crate::compaction::CompactionResult;
use crate::llm::ThinkingConfig;

/// Work items sent TO a session actor
#[derive(Debug)]
pub enum SessionCommand {
    /// User prompt
    Prompt {
        /// Prompt text
        text: String,
        /// Extended thinking configuration for this turn
        thinking: Option<ThinkingConfig>,
    },

    /// Message injected by one of this session's watchers
    WatcherInput(WatcherMessage),

    /// Evaluation turn run on behalf of the watcher loop; replies with the
    /// final response text, or `None` if the turn produced none
    Evaluate {
        /// Evaluation prompt
        prompt: String,
        /// Reply slot
        reply: oneshot::Sender<Option<String>>,
    },

    /// Manual compaction request
    Compact {
        /// Reply slot
        reply: oneshot::Sender<RuntimeResult<CompactionResult>>,
    },

    /// Replace the token state, e.g. after restoring a persisted session
    RestoreTokens(TokenState),
}

/// Text a watcher injects into its parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherMessage {
    /// Injecting watcher
    pub watcher_id: SessionId,
    /// Watcher role, if one was assigned
    pub role: Option<SessionRole>,
    /// Message body
    pub text: String,
}

impl WatcherMessage {
    /// Render the message as the parent sees it:
    /// `[WATCHER: role | Authority: Peer | Session: id] text`
    pub fn formatted(&self) -> String {
        let (name, authority) = match &self.role {
            Some(role) => (role.name.as_str(), role.authority.as_str()),
            None => ("watcher", "Peer"),
        };
        format!(
            "[WATCHER: {} | Authority: {} | Session: {}] {}",
            name, authority, self.watcher_id, self.text
        )
    }
}

/// Output items streamed FROM a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputChunk {
    /// Incremental text output
    TextDelta {
        /// Text fragment
        text: String,
    },

    /// Tool invocation
    ToolCall {
        /// Tool name
        name: String,
        /// Tool arguments
        args: Value,
    },

    /// Tool execution finished
    ToolResult {
        /// Tool name
        name: String,
        /// Tool output
        output: String,
    },

    /// The turn's final response
    FinalResponse {
        /// Complete response text
        content: String,
    },

    /// Input injected by a watcher, echoed before the parent processes it
    WatcherInput {
        /// Formatted watcher message
        text: String,
    },

    /// Error occurred
    Error {
        /// Error message
        message: String,
    },
}

impl OutputChunk {
    /// Create a text delta chunk
    pub fn text(text: impl Into<String>) -> Self {
        OutputChunk::TextDelta { text: text.into() }
    }

    /// Create a tool call chunk
    pub fn tool_call(name: impl Into<String>, args: Value) -> Self {
        OutputChunk::ToolCall {
            name: name.into(),
            args,
        }
    }

    /// Create a tool result chunk
    pub fn tool_result(name: impl Into<String>, output: impl Into<String>) -> Self {
        OutputChunk::ToolResult {
            name: name.into(),
            output: output.into(),
        }
    }

    /// Create a final response chunk
    pub fn final_response(content: impl Into<String>) -> Self {
        OutputChunk::FinalResponse {
            content: content.into(),
        }
    }

    /// Create a watcher input chunk
    pub fn watcher_input(text: impl Into<String>) -> Self {
        OutputChunk::WatcherInput { text: text.into() }
    }

    /// Create an error chunk
    pub fn error(msg: impl Into<String>) -> Self {
        OutputChunk::Error {
            message: msg.into(),
        }
    }

    /// Check if this chunk ends a turn
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutputChunk::FinalResponse { .. } | OutputChunk::Error { .. }
        )
    }

    /// Check if this is a tool-related chunk
    pub fn is_tool(&self) -> bool {
        matches!(
            self,
            OutputChunk::ToolCall { .. } | OutputChunk::ToolResult { .. }
        )
    }

    /// Points where a watcher should evaluate what it has seen so far
    pub fn is_breakpoint(&self) -> bool {
        self.is_terminal() || matches!(self, OutputChunk::ToolResult { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RoleAuthority;
    use uuid::Uuid;

    #[test]
    fn test_output_chunk_checks() {
        assert!(OutputChunk::final_response("done").is_terminal());
        assert!(OutputChunk::error("oops").is_terminal());
        assert!(!OutputChunk::text("hello").is_terminal());

        assert!(OutputChunk::tool_call("Read", Value::Null).is_tool());
        assert!(OutputChunk::tool_result("Read", "ok").is_tool());
        assert!(!OutputChunk::text("hello").is_tool());

        assert!(OutputChunk::tool_result("Read", "ok").is_breakpoint());
        assert!(!OutputChunk::tool_call("Read", Value::Null).is_breakpoint());
    }

    #[test]
    fn test_wire_shape() {
        let chunk = OutputChunk::tool_call("Bash", serde_json::json!({"command": "ls"}));
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["name"], "Bash");
        assert_eq!(json["args"]["command"], "ls");

        let parsed: OutputChunk =
            serde_json::from_str(r#"{"type":"watcher_input","text":"hi"}"#).unwrap();
        assert_eq!(parsed, OutputChunk::watcher_input("hi"));
    }

    #[test]
    fn test_watcher_message_format() {
        let id = Uuid::nil();
        let msg = WatcherMessage {
            watcher_id: id,
            role: Some(SessionRole::new("reviewer", RoleAuthority::Supervisor)),
            text: "check the error path".into(),
        };
        assert_eq!(
            msg.formatted(),
            format!(
                "[WATCHER: reviewer | Authority: Supervisor | Session: {}] check the error path",
                id
            )
        );

        let anonymous = WatcherMessage {
            role: None,
            ..msg
        };
        assert!(anonymous.formatted().starts_with("[WATCHER: watcher | Authority: Peer"));
    }
}
