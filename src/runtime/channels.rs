//! Channel types for session communication
//!
//! Sessions communicate via two channel types:
//! - **Input channel** (mpsc): commands queued for the session actor
//! - **Fan-out channel** (broadcast): every output item, tagged with its
//!   position in the session's output buffer, for any number of watchers

use std::sync::Weak;

use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;

use super::shared::SessionShared;
use crate::core::{OutputChunk, SessionCommand, SessionId};

/// Default buffer size for input channel
pub const INPUT_CHANNEL_SIZE: usize = 32;

/// Default buffer size for output broadcast channel
pub const OUTPUT_CHANNEL_SIZE: usize = 256;

// ============================================================================
// Channel Type Aliases
// ============================================================================

/// Sender half of the input channel (used by SessionHandle)
pub type InputSender = mpsc::Sender<SessionCommand>;

/// Receiver half of the input channel (used by the session actor)
pub type InputReceiver = mpsc::Receiver<SessionCommand>;

/// Sender half of the fan-out channel
pub type OutputSender = broadcast::Sender<SequencedChunk>;

/// Receiver half of the fan-out channel
pub type OutputReceiver = broadcast::Receiver<SequencedChunk>;

/// An output item and its index in the session's output buffer
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedChunk {
    /// Index in the output buffer
    pub seq: u64,
    /// The item
    pub chunk: OutputChunk,
}

// ============================================================================
// Channel Creation
// ============================================================================

/// Create a new input channel pair
pub fn create_input_channel(capacity: usize) -> (InputSender, InputReceiver) {
    mpsc::channel(capacity)
}

/// Bounded broadcast of a session's output.
///
/// Publishing never blocks and never fails: with no subscribers the item is
/// dropped, and a subscriber that falls more than `capacity` items behind
/// is told how many it missed on its next receive.
#[derive(Debug)]
pub struct FanOut {
    tx: OutputSender,
}

impl FanOut {
    /// Create a fan-out channel holding up to `capacity` items per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an item; returns the number of subscribers it reached
    pub fn publish(&self, seq: u64, chunk: OutputChunk) -> usize {
        self.tx.send(SequencedChunk { seq, chunk }).unwrap_or(0)
    }

    /// Create a new raw receiver
    pub fn subscribe(&self) -> OutputReceiver {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new(OUTPUT_CHANNEL_SIZE)
    }
}

// ============================================================================
// Watch Streams
// ============================================================================

/// Why a `WatchStream` could not yield an item
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchError {
    /// The subscriber fell behind; `missed` items were dropped for it
    #[error("Watcher lagged behind by {missed} items")]
    Lagged {
        /// Number of dropped items
        missed: u64,
    },

    /// The session is gone
    #[error("Watched session closed")]
    Closed,
}

/// Live view of one session's output
///
/// After a `Lagged` error the stream can resynchronise with `catch_up`,
/// which reads the missed items from the session's output buffer. Items
/// returned by `catch_up` are not yielded again by `recv`.
#[derive(Debug)]
pub struct WatchStream {
    session_id: SessionId,
    rx: OutputReceiver,
    shared: Weak<SessionShared>,
    next_seq: u64,
}

impl WatchStream {
    pub(crate) fn new(
        session_id: SessionId,
        rx: OutputReceiver,
        shared: Weak<SessionShared>,
        next_seq: u64,
    ) -> Self {
        Self {
            session_id,
            rx,
            shared,
            next_seq,
        }
    }

    /// Session being watched
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Buffer index of the next item this stream will yield
    pub fn position(&self) -> u64 {
        self.next_seq
    }

    /// Receive the next item
    pub async fn recv(&mut self) -> Result<OutputChunk, WatchError> {
        loop {
            match self.rx.recv().await {
                Ok(item) if item.seq < self.next_seq => continue,
                Ok(item) => {
                    self.next_seq = item.seq + 1;
                    return Ok(item.chunk);
                }
                Err(RecvError::Lagged(missed)) => return Err(WatchError::Lagged { missed }),
                Err(RecvError::Closed) => return Err(WatchError::Closed),
            }
        }
    }

    /// Items this stream has not yielded yet, read from the session's
    /// output buffer. Empty once the session is gone.
    pub fn catch_up(&mut self) -> Vec<OutputChunk> {
        let Some(shared) = self.shared.upgrade() else {
            return Vec::new();
        };
        // Move the receiver to the tail first; anything published between
        // here and the buffer read arrives twice and recv drops the copy.
        self.rx = self.rx.resubscribe();
        let missed = shared.buffered_from(self.next_seq);
        self.next_seq += missed.len() as u64;
        missed
    }

    /// Convert into a `Stream` that ends when the session closes
    pub fn into_stream(
        mut self,
    ) -> impl futures::Stream<Item = Result<OutputChunk, WatchError>> + Send {
        async_stream::stream! {
            loop {
                match self.recv().await {
                    Err(WatchError::Closed) => break,
                    other => yield other,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_input_channel() {
        let (tx, mut rx) = create_input_channel(INPUT_CHANNEL_SIZE);

        tx.send(SessionCommand::Prompt {
            text: "Hello".into(),
            thinking: None,
        })
        .await
        .unwrap();

        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, SessionCommand::Prompt { text, .. } if text == "Hello"));
    }

    #[tokio::test]
    async fn test_input_channel_close() {
        let (tx, mut rx) = create_input_channel(INPUT_CHANNEL_SIZE);
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_two_subscribers_see_identical_sequences() {
        let fanout = FanOut::default();
        let mut rx1 = fanout.subscribe();
        let mut rx2 = fanout.subscribe();

        for i in 0..10u64 {
            assert_eq!(fanout.publish(i, OutputChunk::text(format!("{}", i))), 2);
        }

        for i in 0..10u64 {
            let a = rx1.recv().await.unwrap();
            let b = rx2.recv().await.unwrap();
            assert_eq!(a, b);
            assert_eq!(a.seq, i);
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_messages() {
        let fanout = FanOut::default();
        let mut rx_early = fanout.subscribe();

        fanout.publish(0, OutputChunk::text("Early"));
        let mut rx_late = fanout.subscribe();
        fanout.publish(1, OutputChunk::text("Late"));

        assert_eq!(rx_early.recv().await.unwrap().chunk, OutputChunk::text("Early"));
        assert_eq!(rx_early.recv().await.unwrap().chunk, OutputChunk::text("Late"));
        assert_eq!(rx_late.recv().await.unwrap().chunk, OutputChunk::text("Late"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_a_noop() {
        let fanout = FanOut::default();
        assert_eq!(fanout.publish(0, OutputChunk::text("Nobody listening")), 0);
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_overflow_reports_lag() {
        let fanout = FanOut::new(4);
        let mut slow = fanout.subscribe();
        for i in 0..10u64 {
            fanout.publish(i, OutputChunk::text(format!("{}", i)));
        }
        match slow.recv().await {
            Err(RecvError::Lagged(missed)) => assert_eq!(missed, 6),
            other => panic!("expected lag, got {:?}", other),
        }
        assert_eq!(slow.recv().await.unwrap().seq, 6);
    }

    #[tokio::test]
    async fn test_dropping_a_subscriber_does_not_affect_others() {
        let fanout = FanOut::default();
        let dropped = fanout.subscribe();
        let mut kept = fanout.subscribe();
        drop(dropped);
        assert_eq!(fanout.publish(0, OutputChunk::text("still here")), 1);
        assert_eq!(kept.recv().await.unwrap().seq, 0);
    }

    #[tokio::test]
    async fn test_watch_stream_lag_and_catch_up() {
        let shared = Arc::new(SessionShared::new(4));
        let id = SessionId::new_v4();
        let mut stream = shared.subscribe(id);

        for i in 0..10 {
            shared.emit(id, OutputChunk::text(format!("{}", i)));
        }

        assert_eq!(stream.recv().await, Err(WatchError::Lagged { missed: 6 }));
        let missed = stream.catch_up();
        assert_eq!(missed.len(), 10);
        assert_eq!(missed[0], OutputChunk::text("0"));
        assert_eq!(stream.position(), 10);

        shared.emit(id, OutputChunk::text("10"));
        // Retained items 6..9 were already returned by catch_up
        assert_eq!(stream.recv().await, Ok(OutputChunk::text("10")));
    }

    #[tokio::test]
    async fn test_catch_up_does_not_report_lag_again() {
        let shared = Arc::new(SessionShared::new(4));
        let id = SessionId::new_v4();
        let mut stream = shared.subscribe(id);

        for i in 0..4 {
            shared.emit(id, OutputChunk::text(format!("{}", i)));
        }
        assert_eq!(stream.catch_up().len(), 4);

        // A full window of new items must not push out stale positions
        for i in 4..8 {
            shared.emit(id, OutputChunk::text(format!("{}", i)));
        }
        for i in 4..8 {
            assert_eq!(stream.recv().await, Ok(OutputChunk::text(format!("{}", i))));
        }
        assert_eq!(stream.position(), 8);
        assert!(stream.catch_up().is_empty());
    }

    #[tokio::test]
    async fn test_watch_stream_closes_with_session() {
        let shared = Arc::new(SessionShared::new(OUTPUT_CHANNEL_SIZE));
        let id = SessionId::new_v4();
        let stream = shared.subscribe(id);
        shared.emit(id, OutputChunk::final_response("bye"));
        drop(shared);

        let items: Vec<_> = stream.into_stream().collect().await;
        assert_eq!(items, vec![Ok(OutputChunk::final_response("bye"))]);
    }
}
