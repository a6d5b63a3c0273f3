//! Session status

use serde::{Deserialize, Serialize};

/// Execution status of a session actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Waiting for input
    #[default]
    Idle,

    /// Processing a turn
    Running,

    /// Abandoning the in-flight turn after an interrupt
    Interrupting,
}

impl SessionStatus {
    /// Check if the session is working on a turn
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::Interrupting)
    }

    /// Check if the session will pick up new input right away
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionStatus::Idle)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "Idle"),
            SessionStatus::Running => write!(f, "Running"),
            SessionStatus::Interrupting => write!(f, "Interrupting"),
        }
    }
}
