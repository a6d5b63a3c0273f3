//! Runtime error types

use thiserror::Error;

use super::SessionId;

/// Errors that can occur in the session runtime
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// No session was ever registered under this id
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// The watcher already observes a parent
    #[error("Session {watcher} is already watching {parent}")]
    AlreadyWatching {
        /// Session that tried to add a second parent
        watcher: SessionId,
        /// Its current parent
        parent: SessionId,
    },

    /// The new edge would close a cycle in the watch graph
    #[error("Watching {parent} from {watcher} would create a cycle")]
    CircularWatch {
        /// Requested parent
        parent: SessionId,
        /// Requested watcher
        watcher: SessionId,
    },

    /// The session has no parent to inject into
    #[error("Session {0} is not watching any session")]
    NotWatching(SessionId),

    /// A provider call failed
    #[error("Provider error: {0}")]
    Provider(String),

    /// Compaction was attempted and failed
    #[error(transparent)]
    Compaction(#[from] CompactionError),

    /// The session was destroyed, or its actor is gone
    #[error("Channel closed")]
    ChannelClosed,

    /// Send error on channel
    #[error("Failed to send message: {0}")]
    SendError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl RuntimeError {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        RuntimeError::Other(msg.into())
    }

    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        RuntimeError::Provider(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        RuntimeError::InvalidConfig(msg.into())
    }
}

/// Errors raised while compacting a conversation.
///
/// History is never modified when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompactionError {
    /// The summarization call failed
    #[error("Compaction failed: provider error: {0}")]
    Provider(String),

    /// The compacted history could not be persisted
    #[error("Compaction failed: persistence error: {0}")]
    Persistence(String),
}

/// Result type alias for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display() {
        let id = Uuid::nil();
        let err = RuntimeError::SessionNotFound(id);
        assert_eq!(
            err.to_string(),
            "Session not found: 00000000-0000-0000-0000-000000000000"
        );

        let err = RuntimeError::ChannelClosed;
        assert_eq!(err.to_string(), "Channel closed");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let runtime_err: RuntimeError = io_err.into();
        assert!(matches!(runtime_err, RuntimeError::Io(_)));
    }

    #[test]
    fn test_compaction_error_is_transparent() {
        let err: RuntimeError = CompactionError::Provider("rate limited".into()).into();
        assert_eq!(
            err.to_string(),
            "Compaction failed: provider error: rate limited"
        );
        assert!(matches!(err, RuntimeError::Compaction(_)));
    }
}
