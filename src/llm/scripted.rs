//! Deterministic provider that replays scripted turns
//!
//! Used by the demo binary and by tests. When the script runs out, the
//! provider echoes the latest user message back.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::provider::{LlmProvider, ProviderStream};
use super::types::{Message, StreamEvent, ThinkingConfig, ToolDefinition, Usage};
use crate::compaction::estimate_message_tokens;
use crate::core::sync::lock;
use crate::core::OutputChunk;

/// How a scripted turn ends
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEnd {
    /// Report usage and close the stream
    Usage(Usage),
    /// Yield a stream error
    Fail(String),
    /// Never finish; only dropping the stream ends the turn
    Hang,
}

/// One scripted provider response
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedTurn {
    /// Items yielded in order
    pub chunks: Vec<OutputChunk>,
    /// What happens after the last item
    pub end: TurnEnd,
}

impl ScriptedTurn {
    /// A turn that yields `chunks` and reports `usage`
    pub fn respond(chunks: Vec<OutputChunk>, usage: Usage) -> Self {
        Self {
            chunks,
            end: TurnEnd::Usage(usage),
        }
    }

    /// A turn with a single text delta and matching final response
    pub fn text(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::respond(
            vec![OutputChunk::text(reply.clone()), OutputChunk::final_response(reply)],
            Usage::default(),
        )
    }

    /// A turn that yields `chunks` and then fails
    pub fn fail(chunks: Vec<OutputChunk>, message: impl Into<String>) -> Self {
        Self {
            chunks,
            end: TurnEnd::Fail(message.into()),
        }
    }

    /// A turn that yields `chunks` and then stalls
    pub fn hang(chunks: Vec<OutputChunk>) -> Self {
        Self {
            chunks,
            end: TurnEnd::Hang,
        }
    }
}

/// Provider that replays a queue of scripted turns
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    summaries: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<Vec<Message>>>,
    stream_calls: AtomicUsize,
    summarize_calls: AtomicUsize,
    chunk_delay: Duration,
}

impl ScriptedProvider {
    /// Create a provider with an empty script
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            summaries: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            stream_calls: AtomicUsize::new(0),
            summarize_calls: AtomicUsize::new(0),
            chunk_delay: Duration::ZERO,
        }
    }

    /// Sleep before yielding each item
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Queue a turn
    pub fn push_turn(&self, turn: ScriptedTurn) {
        lock(&self.turns).push_back(turn);
    }

    /// Queue the outcome of the next `summarize` call
    pub fn push_summary(&self, summary: Result<String, String>) {
        lock(&self.summaries).push_back(summary);
    }

    /// Number of `stream` calls so far
    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Number of `summarize` calls so far
    pub fn summarize_calls(&self) -> usize {
        self.summarize_calls.load(Ordering::SeqCst)
    }

    /// Message histories received by `stream`, oldest first
    pub fn requests(&self) -> Vec<Vec<Message>> {
        lock(&self.requests).clone()
    }

    fn echo_turn(messages: &[Message]) -> ScriptedTurn {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(Message::text)
            .unwrap_or_default();
        let reply = format!("echo: {}", prompt);
        let usage = Usage {
            input_tokens: messages.iter().map(estimate_message_tokens).sum(),
            output_tokens: estimate_message_tokens(&Message::assistant(reply.clone())),
            cache_read_input_tokens: 0,
        };
        ScriptedTurn::respond(
            vec![OutputChunk::text(reply.clone()), OutputChunk::final_response(reply)],
            usage,
        )
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn stream(
        &self,
        messages: Vec<Message>,
        _tools: Vec<ToolDefinition>,
        _thinking: Option<ThinkingConfig>,
    ) -> Result<ProviderStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let turn = lock(&self.turns)
            .pop_front()
            .unwrap_or_else(|| Self::echo_turn(&messages));
        lock(&self.requests).push(messages);

        let delay = self.chunk_delay;
        let stream = async_stream::stream! {
            for chunk in turn.chunks {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(StreamEvent::Chunk(chunk));
            }
            match turn.end {
                TurnEnd::Usage(usage) => yield Ok(StreamEvent::Usage(usage)),
                TurnEnd::Fail(message) => yield Err(anyhow!(message)),
                TurnEnd::Hang => futures::future::pending::<()>().await,
            }
        };
        Ok(Box::pin(stream))
    }

    async fn summarize(&self, prompt: &str) -> Result<String> {
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        match lock(&self.summaries).pop_front() {
            Some(Ok(summary)) => Ok(summary),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(format!("Summary of {} bytes of conversation", prompt.len())),
        }
    }

    fn model(&self) -> String {
        "scripted".to_string()
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}
