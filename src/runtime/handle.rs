//! SessionHandle - External interface for communicating with a running session
//!
//! The `SessionHandle` is what the registry (and callers holding one) use to
//! interact with a session actor. It provides methods to:
//! - Queue input for the actor
//! - Attach or detach an observer, and read the output buffer
//! - Subscribe to the session's fan-out channel
//! - Check status and request interruption

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc::error::TrySendError, oneshot};
use tokio_util::sync::CancellationToken;

use super::channels::{InputSender, WatchStream};
use super::observer::Observer;
use super::shared::SessionShared;
use crate::compaction::CompactionResult;
use crate::core::{
    OutputChunk, RuntimeError, RuntimeResult, SessionCommand, SessionId, SessionRole,
    SessionStatus, TokenState,
};
use crate::llm::ThinkingConfig;

/// Handle for interacting with a running session
///
/// Handles are cheap to clone. Every clone addresses the same actor.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    ordinal: u64,
    persistence_id: Option<String>,
    role: Option<SessionRole>,
    created_at: DateTime<Utc>,
    shared: Arc<SessionShared>,
    input_tx: InputSender,
    shutdown: CancellationToken,
}

impl SessionHandle {
    pub(crate) fn new(
        id: SessionId,
        ordinal: u64,
        persistence_id: Option<String>,
        role: Option<SessionRole>,
        shared: Arc<SessionShared>,
        input_tx: InputSender,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            ordinal,
            persistence_id,
            role,
            created_at: Utc::now(),
            shared,
            input_tx,
            shutdown,
        }
    }

    /// Get the session ID
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Get the external persistence ID, if any
    pub fn persistence_id(&self) -> Option<&str> {
        self.persistence_id.as_deref()
    }

    /// Get the watcher role, if this session was created as a watcher
    pub fn role(&self) -> Option<&SessionRole> {
        self.role.as_ref()
    }

    /// When the session was created
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // =========================================================================
    // Input Methods
    // =========================================================================

    /// Queue a prompt for the session
    pub fn send_input(
        &self,
        message: impl Into<String>,
        thinking: Option<ThinkingConfig>,
    ) -> RuntimeResult<()> {
        self.try_send(SessionCommand::Prompt {
            text: message.into(),
            thinking,
        })
    }

    /// Queue a command without waiting
    ///
    /// Returns an error if the queue is full or the session is gone.
    pub fn try_send(&self, command: SessionCommand) -> RuntimeResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(RuntimeError::ChannelClosed);
        }
        self.input_tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => RuntimeError::SendError("Channel full".into()),
            TrySendError::Closed(_) => RuntimeError::ChannelClosed,
        })
    }

    /// Queue a command, waiting for queue space
    pub async fn send(&self, command: SessionCommand) -> RuntimeResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(RuntimeError::ChannelClosed);
        }
        self.input_tx
            .send(command)
            .await
            .map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Request cancellation of the in-flight turn
    ///
    /// Returns immediately. The status returning to `Idle` signals that the
    /// turn was abandoned.
    pub fn interrupt(&self) -> RuntimeResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(RuntimeError::ChannelClosed);
        }
        self.shared.cancel_turn();
        Ok(())
    }

    /// Compact the session's history through its actor
    pub async fn compact(&self) -> RuntimeResult<CompactionResult> {
        let (reply, result) = oneshot::channel();
        self.send(SessionCommand::Compact { reply }).await?;
        result.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    // =========================================================================
    // Observer Methods
    // =========================================================================

    /// Install `observer`, replacing any previous one
    pub fn attach(&self, observer: Arc<dyn Observer>) {
        self.shared.set_observer(Some(observer));
    }

    /// Install `observer` and return the output buffered so far; the two
    /// together contain every item exactly once
    pub fn attach_with_replay(&self, observer: Arc<dyn Observer>) -> Vec<OutputChunk> {
        self.shared.attach_with_snapshot(observer)
    }

    /// Clear the observer; returns whether one was attached
    pub fn detach(&self) -> bool {
        self.shared.set_observer(None)
    }

    /// Check if an observer is attached
    pub fn is_attached(&self) -> bool {
        self.shared.has_observer()
    }

    /// The last `limit` buffered items, or the whole buffer
    pub fn buffered_output(&self, limit: Option<usize>) -> Vec<OutputChunk> {
        self.shared.buffered(limit)
    }

    // =========================================================================
    // Output Methods
    // =========================================================================

    /// Subscribe to output from the next item on
    pub fn subscribe(&self) -> WatchStream {
        self.shared.subscribe(self.id)
    }

    /// Buffer snapshot plus a live stream continuing right after it
    pub fn subscribe_with_snapshot(&self) -> (Vec<OutputChunk>, WatchStream) {
        self.shared.subscribe_with_snapshot(self.id)
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscriber_count()
    }

    // =========================================================================
    // State Methods
    // =========================================================================

    /// Get the current status
    pub fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    /// Check if the session is idle
    pub fn is_idle(&self) -> bool {
        self.status().is_idle()
    }

    /// Get the current token state
    pub fn tokens(&self) -> TokenState {
        self.shared.tokens()
    }

    /// Number of messages in the conversation history
    pub fn message_count(&self) -> usize {
        self.shared.message_count()
    }

    /// Number of buffered output items
    pub fn buffered_item_count(&self) -> usize {
        self.shared.buffer_len()
    }

    /// Check if the session was destroyed
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait until the session is idle with an empty input queue
    ///
    /// This polls the status periodically. For event-driven waiting,
    /// subscribe to output and wait for a terminal item.
    pub async fn wait_until_idle(&self) {
        loop {
            let queued = self.input_tx.max_capacity() - self.input_tx.capacity();
            if self.is_closed() || (self.is_idle() && queued == 0) {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        }
    }

    // =========================================================================
    // Registry Internals
    // =========================================================================

    /// Creation order within the registry
    pub(crate) fn ordinal(&self) -> u64 {
        self.ordinal
    }

    pub(crate) fn input_sender(&self) -> InputSender {
        self.input_tx.clone()
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionShared> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("persistence_id", &self.persistence_id)
            .field("status", &self.status())
            .finish()
    }
}
