//! Session runtime
//!
//! This module provides the infrastructure for running background sessions:
//! - `SessionRegistry` - Spawns and manages session tasks
//! - `SessionHandle` - External interface for communicating with a session
//! - `WatchGraph` - Watcher/parent relationships between sessions
//! - Channel types for input and fan-out output
//!
//! Each session runs as its own tokio task and owns its conversation.
//! Output is buffered, handed to an optional observer and fanned out to
//! any number of `WatchStream` subscribers.

pub(crate) mod actor;
pub mod channels;
pub mod graph;
pub mod handle;
pub mod observer;
pub mod registry;
pub(crate) mod shared;
pub mod watcher;

pub use channels::{
    FanOut, InputReceiver, InputSender, OutputReceiver, OutputSender, SequencedChunk, WatchError,
    WatchStream,
};
pub use graph::WatchGraph;
pub use handle::SessionHandle;
pub use observer::{ChannelObserver, DeliveryError, FnObserver, Observer};
pub use registry::{SessionInfo, SessionRegistry};
pub use watcher::{format_evaluation_prompt, parse_interjection, Interjection, ObservationBuffer};
