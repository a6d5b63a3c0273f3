//! Console renderer - an observer that prints a session's output
//!
//! The `ConsoleRenderer` is an opt-in component that:
//! - Is attached to one session at a time as its observer
//! - Renders streaming text, tool activity and watcher input to the terminal
//! - Is completely decoupled from the session logic
//!
//! Other front ends implement `Observer` the same way.

use crate::core::OutputChunk;
use crate::runtime::{DeliveryError, Observer};

use super::console::Console;

/// Observer that renders output items to the terminal
#[derive(Debug, Clone)]
pub struct ConsoleRenderer {
    /// Short label printed with turn boundaries and errors
    label: String,

    /// The console for formatted output
    console: Console,

    /// Whether to show tool calls and results
    show_tools: bool,
}

impl ConsoleRenderer {
    /// Create a renderer for the session labelled `label`
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            console: Console::new(),
            show_tools: true,
        }
    }

    /// Create a renderer with a custom console
    pub fn with_console(label: impl Into<String>, console: Console) -> Self {
        Self {
            label: label.into(),
            console,
            show_tools: true,
        }
    }

    /// Set whether to show tool activity
    pub fn show_tools(mut self, show: bool) -> Self {
        self.show_tools = show;
        self
    }

    /// Render items replayed from the buffer on attach
    pub fn replay(&self, chunks: &[OutputChunk]) {
        let visible: Vec<OutputChunk> = chunks
            .iter()
            .filter(|chunk| self.show_tools || !chunk.is_tool())
            .cloned()
            .collect();
        self.console.print_replay(&self.label, &visible);
    }
}

impl Observer for ConsoleRenderer {
    fn deliver(&self, chunk: OutputChunk) -> Result<(), DeliveryError> {
        if !self.show_tools && chunk.is_tool() {
            return Ok(());
        }
        self.console.print_chunk(&self.label, &chunk);
        Ok(())
    }
}
