//! Session actor
//!
//! One task per session. The actor owns the conversation history, is the
//! only writer of the session's buffer, status and token state, and runs
//! turns one at a time from its input queue.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::channels::InputReceiver;
use super::shared::SessionShared;
use crate::compaction::{
    estimate_message_tokens, should_trigger, CompactionOutcome, CompactionResult, Compactor,
};
use crate::config::RuntimeConfig;
use crate::core::{
    CompactionError, OutputChunk, RuntimeResult, SessionCommand, SessionId, SessionStatus,
    TokenState,
};
use crate::llm::{ContentBlock, LlmProvider, Message, StreamEvent, ThinkingConfig, Usage};
use crate::session::{MessageEnvelope, PersistenceStore};

/// How a turn ended
#[derive(Debug, Clone, PartialEq)]
enum TurnEnd {
    Completed,
    Failed(String),
    Interrupted,
}

/// Everything a finished turn hands back to its caller
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TurnOutcome {
    pub final_response: Option<String>,
}

/// Collects the assistant side of a turn for the conversation history
#[derive(Debug, Default)]
struct TurnRecorder {
    text: String,
    final_response: Option<String>,
    tool_blocks: Vec<ContentBlock>,
    usage: Option<Usage>,
    errored: bool,
}

impl TurnRecorder {
    fn record(&mut self, chunk: &OutputChunk) {
        match chunk {
            OutputChunk::TextDelta { text } => self.text.push_str(text),
            OutputChunk::ToolCall { name, args } => {
                self.tool_blocks.push(ContentBlock::tool_use(name.clone(), args.clone()))
            }
            OutputChunk::ToolResult { name, output } => {
                self.tool_blocks.push(ContentBlock::tool_result(name.clone(), output.clone()))
            }
            OutputChunk::FinalResponse { content } => self.final_response = Some(content.clone()),
            OutputChunk::Error { .. } => self.errored = true,
            OutputChunk::WatcherInput { .. } => {}
        }
    }

    fn into_message(self) -> Option<Message> {
        let text = self.final_response.unwrap_or(self.text);
        if self.tool_blocks.is_empty() {
            return (!text.is_empty()).then(|| Message::assistant(text));
        }
        let mut blocks = self.tool_blocks;
        if !text.is_empty() {
            blocks.push(ContentBlock::text(text));
        }
        Some(Message::assistant_with_blocks(blocks))
    }
}

pub(crate) struct SessionActor {
    id: SessionId,
    persistence_id: Option<String>,
    shared: Arc<SessionShared>,
    commands: InputReceiver,
    shutdown: CancellationToken,
    provider: Arc<dyn LlmProvider>,
    store: Arc<dyn PersistenceStore>,
    config: Arc<RuntimeConfig>,
    compactor: Compactor,
    messages: Vec<Message>,
    tokens: TokenState,
}

impl SessionActor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SessionId,
        persistence_id: Option<String>,
        shared: Arc<SessionShared>,
        commands: InputReceiver,
        shutdown: CancellationToken,
        provider: Arc<dyn LlmProvider>,
        store: Arc<dyn PersistenceStore>,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        let compactor = config.compactor();
        Self {
            id,
            persistence_id,
            shared,
            commands,
            shutdown,
            provider,
            store,
            config,
            compactor,
            messages: Vec::new(),
            tokens: TokenState::default(),
        }
    }

    /// Run until the session is destroyed or its input queue closes
    pub async fn run(mut self) {
        self.restore().await;

        loop {
            let command = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            self.handle(command).await;
        }

        tracing::debug!(session_id = %self.id, "Session actor stopped");
    }

    async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Prompt { text, thinking } => {
                self.run_turn(text, thinking).await;
            }
            SessionCommand::WatcherInput(message) => {
                let text = message.formatted();
                self.shared.emit(self.id, OutputChunk::watcher_input(text.clone()));
                self.run_turn(text, None).await;
            }
            SessionCommand::Evaluate { prompt, reply } => {
                let outcome = self.run_turn(prompt, None).await;
                let _ = reply.send(outcome.final_response);
            }
            SessionCommand::Compact { reply } => {
                self.shared.set_status(SessionStatus::Running);
                let result = self.compact().await;
                self.shared.set_status(SessionStatus::Idle);
                let _ = reply.send(result);
            }
            SessionCommand::RestoreTokens(tokens) => {
                self.tokens = tokens;
                self.shared.set_tokens(tokens);
            }
        }
    }

    async fn restore(&mut self) {
        let Some(persistence_id) = &self.persistence_id else {
            return;
        };
        match self.store.load_messages(persistence_id).await {
            Ok(messages) => {
                self.tokens = TokenState::new(messages.iter().map(estimate_message_tokens).sum(), 0, 0);
                self.messages = messages;
                self.shared.set_tokens(self.tokens);
                self.shared.set_message_count(self.messages.len());
                tracing::info!(
                    session_id = %self.id,
                    persistence_id = %persistence_id,
                    messages = self.messages.len(),
                    "Restored session history"
                );
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.id,
                    persistence_id = %persistence_id,
                    error = %e,
                    "Failed to restore session history; starting empty"
                );
            }
        }
    }

    // ========================================================================
    // Turns
    // ========================================================================

    async fn run_turn(&mut self, text: String, thinking: Option<ThinkingConfig>) -> TurnOutcome {
        let turn = self.shared.begin_turn(&self.shutdown);

        let user = Message::user(text);
        self.messages.push(user.clone());
        let mut appended = vec![user];

        let mut recorder = TurnRecorder::default();
        let end = self.stream_turn(&turn, thinking, &mut recorder).await;

        match &end {
            TurnEnd::Completed => {}
            TurnEnd::Interrupted => {
                tracing::info!(session_id = %self.id, "Turn interrupted");
            }
            TurnEnd::Failed(message) => {
                tracing::warn!(session_id = %self.id, error = %message, "Provider error during turn");
                self.shared.emit(self.id, OutputChunk::error(message.clone()));
            }
        }

        let errored = recorder.errored;
        let usage = recorder.usage;
        let final_response = recorder.final_response.clone();
        if let Some(message) = recorder.into_message() {
            self.messages.push(message.clone());
            appended.push(message);
        }
        if let Some(usage) = usage {
            self.tokens = usage.into();
            self.shared.set_tokens(self.tokens);
        }
        self.shared.set_message_count(self.messages.len());

        if self.shutdown.is_cancelled() {
            return TurnOutcome { final_response };
        }

        self.persist(appended).await;

        if end == TurnEnd::Completed && !errored {
            self.maybe_compact().await;
        }

        self.shared.end_turn();
        TurnOutcome { final_response }
    }

    async fn stream_turn(
        &self,
        turn: &CancellationToken,
        thinking: Option<ThinkingConfig>,
        recorder: &mut TurnRecorder,
    ) -> TurnEnd {
        let request = self
            .provider
            .stream(self.messages.clone(), self.config.tools.clone(), thinking);

        let mut stream = tokio::select! {
            biased;
            _ = turn.cancelled() => return TurnEnd::Interrupted,
            result = request => match result {
                Ok(stream) => stream,
                Err(e) => return TurnEnd::Failed(e.to_string()),
            },
        };

        loop {
            tokio::select! {
                biased;
                _ = turn.cancelled() => return TurnEnd::Interrupted,
                event = stream.next() => match event {
                    Some(Ok(StreamEvent::Chunk(chunk))) => {
                        recorder.record(&chunk);
                        self.shared.emit(self.id, chunk);
                    }
                    Some(Ok(StreamEvent::Usage(usage))) => recorder.usage = Some(usage),
                    Some(Err(e)) => return TurnEnd::Failed(e.to_string()),
                    None => return TurnEnd::Completed,
                },
            }
        }
    }

    async fn persist(&self, messages: Vec<Message>) {
        let Some(persistence_id) = &self.persistence_id else {
            return;
        };
        for message in messages {
            let envelope = MessageEnvelope::message(self.id, message);
            if let Err(e) = self.store.store_envelope(persistence_id, &envelope).await {
                tracing::warn!(
                    session_id = %self.id,
                    persistence_id = %persistence_id,
                    error = %e,
                    "Failed to persist message"
                );
            }
        }
    }

    // ========================================================================
    // Compaction
    // ========================================================================

    async fn maybe_compact(&mut self) {
        if !should_trigger(&self.config.model, &self.config.compaction, &self.tokens) {
            return;
        }

        tracing::info!(
            session_id = %self.id,
            tokens = self.tokens.total(),
            "Context threshold exceeded; compacting"
        );
        if let Err(e) = self.compact().await {
            tracing::warn!(session_id = %self.id, error = %e, "Automatic compaction failed");
        }
    }

    /// Compact the history. On any failure the history is left as it was.
    async fn compact(&mut self) -> RuntimeResult<CompactionResult> {
        let outcome = self
            .compactor
            .compact(&self.messages, &self.tokens, self.provider.as_ref())
            .await?;

        let history = match outcome {
            CompactionOutcome::NothingToCompact => {
                tracing::debug!(session_id = %self.id, "Nothing to compact");
                return Ok(CompactionResult::nothing_to_compact());
            }
            CompactionOutcome::Compacted(history) => history,
        };

        if let Some(persistence_id) = &self.persistence_id {
            let envelope = MessageEnvelope::compacted(self.id, history.messages.clone());
            self.store
                .store_envelope(persistence_id, &envelope)
                .await
                .map_err(|e| CompactionError::Persistence(e.to_string()))?;
        }

        self.messages = history.messages;
        self.tokens = history.tokens;
        self.shared.set_tokens(self.tokens);
        self.shared.set_message_count(self.messages.len());

        tracing::info!(
            session_id = %self.id,
            original_tokens = history.result.original_tokens,
            compacted_tokens = history.result.compacted_tokens,
            turns_summarized = history.result.turns_summarized,
            turns_kept = history.result.turns_kept,
            "Compacted session history"
        );
        Ok(history.result)
    }
}
