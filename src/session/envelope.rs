//! Persisted history records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::SessionId;
use crate::llm::Message;

/// One line of a persisted session history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Unique identifier for this record
    pub id: Uuid,
    /// Runtime session that wrote the record
    pub session_id: SessionId,
    /// When the record was written
    pub timestamp: DateTime<Utc>,
    /// Record body
    pub payload: EnvelopePayload,
}

/// Body of a history record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvelopePayload {
    /// A message appended to the conversation
    Message {
        /// The message
        message: Message,
    },
    /// The conversation was compacted; these messages replace all earlier ones
    Compacted {
        /// Compacted history
        messages: Vec<Message>,
    },
}

impl MessageEnvelope {
    /// Wrap a conversation message
    pub fn message(session_id: SessionId, message: Message) -> Self {
        Self::new(session_id, EnvelopePayload::Message { message })
    }

    /// Record a compacted history
    pub fn compacted(session_id: SessionId, messages: Vec<Message>) -> Self {
        Self::new(session_id, EnvelopePayload::Compacted { messages })
    }

    fn new(session_id: SessionId, payload: EnvelopePayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Rebuild a conversation from its records, oldest first.
pub fn replay<'a>(envelopes: impl IntoIterator<Item = &'a MessageEnvelope>) -> Vec<Message> {
    let mut messages = Vec::new();
    for envelope in envelopes {
        match &envelope.payload {
            EnvelopePayload::Message { message } => messages.push(message.clone()),
            EnvelopePayload::Compacted { messages: compacted } => {
                messages = compacted.clone();
            }
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_applies_compaction() {
        let id = Uuid::new_v4();
        let records = vec![
            MessageEnvelope::message(id, Message::user("one")),
            MessageEnvelope::message(id, Message::assistant("two")),
            MessageEnvelope::compacted(id, vec![Message::user("summary")]),
            MessageEnvelope::message(id, Message::user("three")),
        ];
        let messages = replay(&records);
        assert_eq!(messages, vec![Message::user("summary"), Message::user("three")]);
    }

    #[test]
    fn test_envelope_json_shape() {
        let envelope = MessageEnvelope::message(Uuid::nil(), Message::user("hi"));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["payload"]["kind"], "message");
        assert_eq!(json["payload"]["message"]["role"], "user");
    }
}
