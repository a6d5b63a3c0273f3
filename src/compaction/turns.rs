//! Grouping of messages into conversation turns

use crate::llm::{ContentBlock, Message};

/// Estimate tokens in a piece of text (about four bytes per token).
pub fn estimate_tokens(text: &str) -> u64 {
    text.len().div_ceil(4) as u64
}

/// Estimate tokens in a message, tool traffic included.
pub fn estimate_message_tokens(message: &Message) -> u64 {
    message.rendered_len().div_ceil(4) as u64
}

/// A user message and everything the assistant did in response
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    messages: Vec<Message>,
}

impl ConversationTurn {
    fn new(first: Message) -> Self {
        Self {
            messages: vec![first],
        }
    }

    /// Messages of the turn, in original order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Consume the turn into its messages
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Text of the user messages in this turn
    pub fn user_text(&self) -> String {
        self.joined(|m| m.is_user())
    }

    /// Text of the assistant messages in this turn
    pub fn assistant_text(&self) -> String {
        self.joined(|m| m.is_assistant())
    }

    /// Names of the tools invoked during the turn, in call order
    pub fn tool_names(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter_map(Message::blocks)
            .flatten()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Estimated token size of the turn
    pub fn estimated_tokens(&self) -> u64 {
        self.messages.iter().map(estimate_message_tokens).sum()
    }

    fn joined(&self, keep: impl Fn(&Message) -> bool) -> String {
        self.messages
            .iter()
            .filter(|m| keep(m))
            .map(Message::text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Split a history into turns.
///
/// Each user message opens a turn. Assistant messages before the first user
/// message form a turn of their own.
pub fn group_turns(messages: &[Message]) -> Vec<ConversationTurn> {
    let mut turns: Vec<ConversationTurn> = Vec::new();
    for message in messages {
        match turns.last_mut() {
            Some(turn) if !message.is_user() => turn.messages.push(message.clone()),
            _ => turns.push(ConversationTurn::new(message.clone())),
        }
    }
    turns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<Message> {
        vec![
            Message::user("read the config"),
            Message::assistant_with_blocks(vec![
                ContentBlock::tool_use("Read", serde_json::json!({"path": "config.toml"})),
                ContentBlock::tool_result("Read", "port = 80"),
                ContentBlock::text("The port is 80."),
            ]),
            Message::user("change it to 8080"),
            Message::assistant("Done."),
        ]
    }

    #[test]
    fn test_group_turns() {
        let turns = group_turns(&history());
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].user_text(), "read the config");
        assert_eq!(turns[0].assistant_text(), "The port is 80.");
        assert_eq!(turns[0].tool_names(), vec!["Read"]);
        assert_eq!(turns[1].messages().len(), 2);
    }

    #[test]
    fn test_leading_assistant_message_forms_a_turn() {
        let messages = vec![Message::assistant("resumed"), Message::user("next")];
        let turns = group_turns(&messages);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].assistant_text(), "resumed");
        assert!(turns[0].user_text().is_empty());
    }

    #[test]
    fn test_estimates() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        let turns = group_turns(&history());
        assert!(turns[0].estimated_tokens() > turns[1].estimated_tokens());
        assert!(group_turns(&[]).is_empty());
    }
}
