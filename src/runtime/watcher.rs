//! Watcher sessions
//!
//! A watcher observes its parent's output stream, batches what it sees until
//! a natural breakpoint or a quiet period, and runs an evaluation turn on
//! its own actor. A reply containing an `[INTERJECT]` block can be injected
//! back into the parent.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::channels::{InputSender, WatchError, WatchStream};
use super::shared::SessionShared;
use crate::core::{OutputChunk, RoleAuthority, SessionCommand, SessionId, SessionRole, WatcherMessage};

// =============================================================================
// Interjections
// =============================================================================

/// Message a watcher wants delivered to its parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interjection {
    /// Interrupt the parent's current turn before injecting
    pub urgent: bool,
    /// Message body
    pub content: String,
}

fn block<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let len = text[start..].find(close)?;
    Some(&text[start..start + len])
}

/// Parse a watcher's evaluation reply.
///
/// A `[CONTINUE]...[/CONTINUE]` block means no interjection. Otherwise an
/// `[INTERJECT]...[/INTERJECT]` block must carry `urgent: true|false` and a
/// non-empty `content:` field, which may span several lines.
pub fn parse_interjection(response: &str) -> Option<Interjection> {
    if block(response, "[CONTINUE]", "[/CONTINUE]").is_some() {
        return None;
    }
    let body = block(response, "[INTERJECT]", "[/INTERJECT]")?;

    let mut urgent = None;
    let mut content: Option<Vec<&str>> = None;
    for line in body.lines() {
        let trimmed = line.trim();
        if let Some(value) = trimmed.strip_prefix("urgent:") {
            if content.is_some() {
                break;
            }
            urgent = match value.trim() {
                "true" => Some(true),
                "false" => Some(false),
                other => {
                    tracing::warn!(value = other, "Invalid urgent value in interjection");
                    return None;
                }
            };
        } else if let Some(first) = trimmed.strip_prefix("content:") {
            content = Some(vec![first.trim_start()]);
        } else if let Some(lines) = content.as_mut() {
            lines.push(line);
        }
    }

    let Some(urgent) = urgent else {
        tracing::warn!("Interjection is missing the urgent field");
        return None;
    };
    let content = content?.join("\n").trim().to_string();
    if content.is_empty() {
        tracing::warn!("Interjection has empty content");
        return None;
    }
    Some(Interjection { urgent, content })
}

// =============================================================================
// Observation batching
// =============================================================================

/// Parent output accumulated between evaluations
#[derive(Debug, Default)]
pub struct ObservationBuffer {
    chunks: Vec<OutputChunk>,
    last_push: Option<Instant>,
}

impl ObservationBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observed item
    pub fn push(&mut self, chunk: OutputChunk) {
        self.chunks.push(chunk);
        self.last_push = Some(Instant::now());
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Buffered items
    pub fn chunks(&self) -> &[OutputChunk] {
        &self.chunks
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.last_push = None;
    }

    /// Time left before the quiet period elapses; `None` while empty
    pub fn time_until_silence(&self, timeout: Duration) -> Option<Duration> {
        if self.chunks.is_empty() {
            return None;
        }
        let elapsed = self.last_push.map(|t| t.elapsed()).unwrap_or_default();
        Some(timeout.saturating_sub(elapsed))
    }
}

/// Build the prompt a watcher evaluates its observations with
pub fn format_evaluation_prompt(buffer: &ObservationBuffer, role: &SessionRole) -> String {
    let mut prompt = format!("You are watching another session as: {}\n", role.name);
    if let Some(description) = &role.description {
        prompt.push_str(&format!("Your focus: {}\n", description));
    }
    let weight = match role.authority {
        RoleAuthority::Supervisor => "the parent session is expected to follow your interjections",
        RoleAuthority::Peer => "the parent session may take or leave your interjections",
    };
    prompt.push_str(&format!("Authority: {} ({})\n\n", role.authority, weight));

    prompt.push_str("--- observed output ---\n");
    for chunk in buffer.chunks() {
        match chunk {
            OutputChunk::TextDelta { text } => prompt.push_str(text),
            OutputChunk::ToolCall { name, args } => {
                prompt.push_str(&format!("\n[tool call] {} {}\n", name, args))
            }
            OutputChunk::ToolResult { name, output } => {
                prompt.push_str(&format!("\n[tool result] {}\n{}\n", name, output))
            }
            OutputChunk::FinalResponse { .. } => prompt.push_str("\n[turn complete]\n"),
            OutputChunk::WatcherInput { text } => {
                prompt.push_str(&format!("\n[watcher input] {}\n", text))
            }
            OutputChunk::Error { message } => prompt.push_str(&format!("\n[error] {}\n", message)),
        }
    }
    prompt.push_str("\n--- end of observed output ---\n\n");

    prompt.push_str(
        "Reply with exactly one block.\n\
         To send the parent a message:\n\
         [INTERJECT]\n\
         urgent: true\n\
         content: <message>\n\
         [/INTERJECT]\n\
         urgent: true interrupts the parent's current turn; urgent: false waits for it to finish.\n\
         If nothing needs saying:\n\
         [CONTINUE]\n\
         <optional reasoning>\n\
         [/CONTINUE]\n",
    );
    prompt
}

// =============================================================================
// Observation loop
// =============================================================================

/// The parent as seen from a watcher's loop; holds no strong reference
pub(crate) struct ParentLink {
    pub id: SessionId,
    pub commands: InputSender,
    pub shared: Weak<SessionShared>,
}

enum LoopEvent {
    Stop,
    Observed(Result<OutputChunk, WatchError>),
    Quiet,
}

pub(crate) struct WatchLoop {
    pub watcher_id: SessionId,
    pub role: SessionRole,
    pub watcher_commands: InputSender,
    pub parent: ParentLink,
    pub stream: WatchStream,
    pub silence_timeout: Duration,
    pub stop: CancellationToken,
}

impl WatchLoop {
    pub async fn run(mut self) {
        let mut buffer = ObservationBuffer::new();

        loop {
            let quiet = buffer.time_until_silence(self.silence_timeout);
            let event = tokio::select! {
                biased;
                _ = self.stop.cancelled() => LoopEvent::Stop,
                item = self.stream.recv() => LoopEvent::Observed(item),
                _ = tokio::time::sleep(quiet.unwrap_or_default()), if quiet.is_some() => {
                    LoopEvent::Quiet
                }
            };

            let keep_going = match event {
                LoopEvent::Stop => false,
                LoopEvent::Quiet => self.evaluate(&mut buffer).await,
                LoopEvent::Observed(Ok(chunk)) => {
                    let evaluate = chunk.is_breakpoint();
                    buffer.push(chunk);
                    !evaluate || self.evaluate(&mut buffer).await
                }
                LoopEvent::Observed(Err(WatchError::Lagged { missed })) => {
                    tracing::warn!(
                        watcher_id = %self.watcher_id,
                        parent_id = %self.parent.id,
                        missed,
                        "Watcher lagged; catching up from the parent's buffer"
                    );
                    let mut evaluate = false;
                    for chunk in self.stream.catch_up() {
                        evaluate |= chunk.is_breakpoint();
                        buffer.push(chunk);
                    }
                    !evaluate || self.evaluate(&mut buffer).await
                }
                LoopEvent::Observed(Err(WatchError::Closed)) => false,
            };
            if !keep_going {
                break;
            }
        }

        tracing::debug!(
            watcher_id = %self.watcher_id,
            parent_id = %self.parent.id,
            "Watcher loop stopped"
        );
    }

    /// Run an evaluation turn; returns false once the loop should stop
    async fn evaluate(&mut self, buffer: &mut ObservationBuffer) -> bool {
        let prompt = format_evaluation_prompt(buffer, &self.role);
        buffer.clear();

        let (reply, response) = oneshot::channel();
        let command = SessionCommand::Evaluate { prompt, reply };
        if self.watcher_commands.send(command).await.is_err() {
            return false;
        }
        let response = tokio::select! {
            _ = self.stop.cancelled() => return false,
            response = response => response.ok().flatten(),
        };

        let Some(interjection) = response.as_deref().and_then(parse_interjection) else {
            return true;
        };
        if !self.role.auto_inject {
            tracing::info!(
                watcher_id = %self.watcher_id,
                urgent = interjection.urgent,
                "Watcher produced an interjection; auto-inject is off"
            );
            return true;
        }
        self.inject(interjection);
        true
    }

    fn inject(&self, interjection: Interjection) {
        if interjection.urgent {
            if let Some(parent) = self.parent.shared.upgrade() {
                parent.cancel_turn();
            }
        }
        let message = WatcherMessage {
            watcher_id: self.watcher_id,
            role: Some(self.role.clone()),
            text: interjection.content,
        };
        match self.parent.commands.try_send(SessionCommand::WatcherInput(message)) {
            Ok(()) => tracing::info!(
                watcher_id = %self.watcher_id,
                parent_id = %self.parent.id,
                urgent = interjection.urgent,
                "Injected watcher interjection"
            ),
            Err(e) => tracing::warn!(
                watcher_id = %self.watcher_id,
                parent_id = %self.parent.id,
                error = %e,
                "Failed to inject watcher interjection"
            ),
        }
    }
}
