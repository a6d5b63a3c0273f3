//! Attached observers
//!
//! An observer receives a session's output live while it is attached. The
//! actor calls `deliver` inline for every item, so implementations must
//! return quickly and must not attach or detach observers themselves.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::OutputChunk;

/// Why an observer could not take an item
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The receiving side is gone
    #[error("Observer disconnected")]
    Disconnected,

    /// The observer refused the item
    #[error("Observer rejected item: {0}")]
    Rejected(String),
}

/// Capability that receives a session's live output
pub trait Observer: Send + Sync {
    /// Take one output item
    fn deliver(&self, chunk: OutputChunk) -> Result<(), DeliveryError>;
}

/// Observer backed by a closure
pub struct FnObserver<F> {
    f: F,
}

impl<F> FnObserver<F>
where
    F: Fn(OutputChunk) -> Result<(), DeliveryError> + Send + Sync,
{
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Observer for FnObserver<F>
where
    F: Fn(OutputChunk) -> Result<(), DeliveryError> + Send + Sync,
{
    fn deliver(&self, chunk: OutputChunk) -> Result<(), DeliveryError> {
        (self.f)(chunk)
    }
}

/// Observer that forwards items into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<OutputChunk>,
}

impl ChannelObserver {
    /// Create an observer and the receiver it feeds
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutputChunk>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Observer for ChannelObserver {
    fn deliver(&self, chunk: OutputChunk) -> Result<(), DeliveryError> {
        self.tx.send(chunk).map_err(|_| DeliveryError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_fn_observer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer = FnObserver::new(move |chunk| {
            sink.lock().unwrap().push(chunk);
            Ok(())
        });

        observer.deliver(OutputChunk::text("a")).unwrap();
        observer.deliver(OutputChunk::text("b")).unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![OutputChunk::text("a"), OutputChunk::text("b")]
        );
    }

    #[tokio::test]
    async fn test_channel_observer() {
        let (observer, mut rx) = ChannelObserver::new();
        observer.deliver(OutputChunk::text("hi")).unwrap();
        assert_eq!(rx.recv().await, Some(OutputChunk::text("hi")));

        drop(rx);
        assert_eq!(
            observer.deliver(OutputChunk::text("lost")),
            Err(DeliveryError::Disconnected)
        );
    }
}
