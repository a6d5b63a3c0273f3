//! Per-session state shared between the actor and its readers
//!
//! Only the session's own actor writes the buffer, status and token state.
//! The registry and external callers read them concurrently.

use std::sync::{Arc, Mutex, RwLock};

use tokio_util::sync::CancellationToken;

use super::channels::{FanOut, WatchStream};
use super::observer::Observer;
use crate::core::sync::{lock, read, write};
use crate::core::{OutputChunk, SessionId, SessionStatus, TokenState};

/// Snapshot-able state of one session
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub status: SessionStatus,
    pub buffer: Vec<OutputChunk>,
    pub tokens: TokenState,
    pub message_count: usize,
}

pub(crate) struct SessionShared {
    state: RwLock<SessionState>,
    // Held for the whole of a delivery so detach never races an in-flight item.
    observer: Mutex<Option<Arc<dyn Observer>>>,
    fanout: FanOut,
    // The in-flight turn, if any. Locked before `state` when both are held.
    turn: Mutex<Option<CancellationToken>>,
}

impl SessionShared {
    pub fn new(fanout_capacity: usize) -> Self {
        Self {
            state: RwLock::new(SessionState::default()),
            observer: Mutex::new(None),
            fanout: FanOut::new(fanout_capacity),
            turn: Mutex::new(None),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn status(&self) -> SessionStatus {
        read(&self.state).status
    }

    pub fn tokens(&self) -> TokenState {
        read(&self.state).tokens
    }

    pub fn message_count(&self) -> usize {
        read(&self.state).message_count
    }

    pub fn buffer_len(&self) -> usize {
        read(&self.state).buffer.len()
    }

    /// The last `limit` buffered items, or all of them
    pub fn buffered(&self, limit: Option<usize>) -> Vec<OutputChunk> {
        let state = read(&self.state);
        let start = limit
            .map(|n| state.buffer.len().saturating_sub(n))
            .unwrap_or(0);
        state.buffer[start..].to_vec()
    }

    /// Buffered items from index `seq` on
    pub fn buffered_from(&self, seq: u64) -> Vec<OutputChunk> {
        let state = read(&self.state);
        let start = usize::try_from(seq).unwrap_or(usize::MAX).min(state.buffer.len());
        state.buffer[start..].to_vec()
    }

    pub fn subscriber_count(&self) -> usize {
        self.fanout.subscriber_count()
    }

    pub fn has_observer(&self) -> bool {
        lock(&self.observer).is_some()
    }

    // ========================================================================
    // Observers and subscriptions
    // ========================================================================

    /// Install or clear the observer; returns whether one was installed before
    pub fn set_observer(&self, observer: Option<Arc<dyn Observer>>) -> bool {
        std::mem::replace(&mut *lock(&self.observer), observer).is_some()
    }

    /// Install `observer` and return the buffer as of that instant; every
    /// later item goes to the observer
    pub fn attach_with_snapshot(&self, observer: Arc<dyn Observer>) -> Vec<OutputChunk> {
        let mut slot = lock(&self.observer);
        let snapshot = read(&self.state).buffer.clone();
        *slot = Some(observer);
        snapshot
    }

    /// Live stream starting at the next item
    pub fn subscribe(self: &Arc<Self>, session_id: SessionId) -> WatchStream {
        self.subscribe_with_snapshot(session_id).1
    }

    /// Buffer snapshot plus a live stream that continues exactly after it
    pub fn subscribe_with_snapshot(
        self: &Arc<Self>,
        session_id: SessionId,
    ) -> (Vec<OutputChunk>, WatchStream) {
        let state = read(&self.state);
        let rx = self.fanout.subscribe();
        let snapshot = state.buffer.clone();
        let stream = WatchStream::new(
            session_id,
            rx,
            Arc::downgrade(self),
            snapshot.len() as u64,
        );
        (snapshot, stream)
    }

    // ========================================================================
    // Actor-side writes
    // ========================================================================

    pub fn set_status(&self, status: SessionStatus) {
        write(&self.state).status = status;
    }

    pub fn set_tokens(&self, tokens: TokenState) {
        write(&self.state).tokens = tokens;
    }

    pub fn set_message_count(&self, count: usize) {
        write(&self.state).message_count = count;
    }

    /// Append `chunk` to the buffer, hand it to the observer, then publish it
    pub fn emit(&self, session_id: SessionId, chunk: OutputChunk) {
        let slot = lock(&self.observer);
        let seq = {
            let mut state = write(&self.state);
            state.buffer.push(chunk.clone());
            (state.buffer.len() - 1) as u64
        };
        if let Some(observer) = slot.as_ref() {
            if let Err(e) = observer.deliver(chunk.clone()) {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "Observer delivery failed"
                );
            }
        }
        drop(slot);
        self.fanout.publish(seq, chunk);
    }

    // ========================================================================
    // Turn cancellation
    // ========================================================================

    /// Start a new cancellable turn under `session`
    pub fn begin_turn(&self, session: &CancellationToken) -> CancellationToken {
        let token = session.child_token();
        let mut turn = lock(&self.turn);
        *turn = Some(token.clone());
        write(&self.state).status = SessionStatus::Running;
        token
    }

    /// Finish the current turn and go back to `Idle`
    pub fn end_turn(&self) {
        let mut turn = lock(&self.turn);
        *turn = None;
        write(&self.state).status = SessionStatus::Idle;
    }

    /// Cancel the current turn and mark the session `Interrupting`;
    /// returns false when no turn is in flight
    pub fn cancel_turn(&self) -> bool {
        let turn = lock(&self.turn);
        match turn.as_ref() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                write(&self.state).status = SessionStatus::Interrupting;
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for SessionShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = read(&self.state);
        f.debug_struct("SessionShared")
            .field("status", &state.status)
            .field("buffered", &state.buffer.len())
            .field("tokens", &state.tokens)
            .field("subscribers", &self.fanout.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::channels::OUTPUT_CHANNEL_SIZE;
    use crate::runtime::observer::{ChannelObserver, DeliveryError, FnObserver};

    fn shared() -> Arc<SessionShared> {
        Arc::new(SessionShared::new(OUTPUT_CHANNEL_SIZE))
    }

    #[tokio::test]
    async fn test_emit_order_buffer_observer_fanout() {
        let shared = shared();
        let id = SessionId::new_v4();
        let (observer, mut observed) = ChannelObserver::new();
        shared.set_observer(Some(Arc::new(observer)));
        let mut stream = shared.subscribe(id);

        shared.emit(id, OutputChunk::text("a"));
        shared.emit(id, OutputChunk::final_response("a"));

        assert_eq!(shared.buffered(None).len(), 2);
        assert_eq!(observed.recv().await, Some(OutputChunk::text("a")));
        assert_eq!(stream.recv().await, Ok(OutputChunk::text("a")));
        assert_eq!(stream.recv().await, Ok(OutputChunk::final_response("a")));
    }

    #[tokio::test]
    async fn test_failing_observer_does_not_stop_emission() {
        let shared = shared();
        let id = SessionId::new_v4();
        shared.set_observer(Some(Arc::new(FnObserver::new(|_| {
            Err(DeliveryError::Rejected("full".into()))
        }))));

        shared.emit(id, OutputChunk::text("a"));
        shared.emit(id, OutputChunk::text("b"));
        assert_eq!(shared.buffer_len(), 2);
    }

    #[test]
    fn test_buffered_limits() {
        let shared = shared();
        let id = SessionId::new_v4();
        for i in 0..5 {
            shared.emit(id, OutputChunk::text(format!("{}", i)));
        }
        assert_eq!(shared.buffered(Some(2)), vec![OutputChunk::text("3"), OutputChunk::text("4")]);
        assert_eq!(shared.buffered(Some(50)).len(), 5);
        assert_eq!(shared.buffered_from(3).len(), 2);
        assert!(shared.buffered_from(99).is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_and_stream_do_not_overlap() {
        let shared = shared();
        let id = SessionId::new_v4();
        shared.emit(id, OutputChunk::text("before"));
        let (snapshot, mut stream) = shared.subscribe_with_snapshot(id);
        shared.emit(id, OutputChunk::text("after"));

        assert_eq!(snapshot, vec![OutputChunk::text("before")]);
        assert_eq!(stream.recv().await, Ok(OutputChunk::text("after")));
    }

    #[test]
    fn test_set_observer_reports_previous() {
        let shared = shared();
        let (observer, _rx) = ChannelObserver::new();
        assert!(!shared.set_observer(Some(Arc::new(observer))));
        assert!(shared.has_observer());
        assert!(shared.set_observer(None));
        assert!(!shared.set_observer(None));
    }

    #[test]
    fn test_cancel_turn() {
        let shared = shared();
        let session = CancellationToken::new();
        let turn = shared.begin_turn(&session);
        assert_eq!(shared.status(), SessionStatus::Running);
        assert!(shared.cancel_turn());
        assert!(turn.is_cancelled());
        assert!(!session.is_cancelled());
        assert_eq!(shared.status(), SessionStatus::Interrupting);
        assert!(!shared.cancel_turn());

        shared.end_turn();
        assert_eq!(shared.status(), SessionStatus::Idle);

        let next = shared.begin_turn(&session);
        assert!(!next.is_cancelled());
        session.cancel();
        assert!(next.is_cancelled());
    }

    #[test]
    fn test_cancel_without_turn_keeps_status() {
        let shared = shared();
        assert!(!shared.cancel_turn());
        assert_eq!(shared.status(), SessionStatus::Idle);

        let session = CancellationToken::new();
        shared.begin_turn(&session);
        shared.end_turn();
        assert!(!shared.cancel_turn());
        assert_eq!(shared.status(), SessionStatus::Idle);
    }
}
