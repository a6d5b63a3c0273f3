use colored::*;
use std::io::{self, Write};

use crate::core::{OutputChunk, SessionStatus};
use crate::runtime::SessionInfo;

/// Console handles all terminal I/O with colored formatting
#[derive(Debug, Clone)]
pub struct Console {
    user_color: Color,
    assistant_color: Color,
    tool_color: Color,
    watcher_color: Color,
}

impl Console {
    /// Create a new Console with default colors
    pub fn new() -> Self {
        Self {
            user_color: Color::Cyan,
            assistant_color: Color::Green,
            tool_color: Color::Magenta,
            watcher_color: Color::Yellow,
        }
    }

    /// Create a new Console with custom colors
    pub fn with_colors(
        user_color: Color,
        assistant_color: Color,
        tool_color: Color,
        watcher_color: Color,
    ) -> Self {
        Self {
            user_color,
            assistant_color,
            tool_color,
            watcher_color,
        }
    }

    /// Render one output item of the session labelled `label`
    pub fn print_chunk(&self, label: &str, chunk: &OutputChunk) {
        match chunk {
            OutputChunk::TextDelta { text } => {
                print!("{}", text.color(self.assistant_color));
                flush();
            }
            OutputChunk::ToolCall { name, args } => {
                println!();
                self.print_tool_action(name, &args.to_string());
            }
            OutputChunk::ToolResult { name, output } => {
                self.print_tool_result(name, output);
            }
            OutputChunk::FinalResponse { .. } => {
                println!();
                println!("{}", format!("[{}] turn complete", label).bright_black());
            }
            OutputChunk::WatcherInput { text } => {
                println!("{} {}", "Watcher:".color(self.watcher_color).bold(), text);
            }
            OutputChunk::Error { message } => {
                println!();
                self.print_error(&format!("[{}] {}", label, message));
            }
        }
    }

    /// Print items replayed from a session's buffer
    pub fn print_replay(&self, label: &str, chunks: &[OutputChunk]) {
        if chunks.is_empty() {
            return;
        }
        self.print_system(&format!("Replaying {} buffered items from {}", chunks.len(), label));
        for chunk in chunks {
            self.print_chunk(label, chunk);
        }
    }

    /// Print a user message with colored formatting
    pub fn print_user(&self, message: &str) {
        println!("{} {}", "User:".color(self.user_color).bold(), message);
    }

    /// Print a system message (errors, info, etc.)
    pub fn print_system(&self, message: &str) {
        println!("{} {}", "System:".yellow().bold(), message);
    }

    /// Print an error message
    pub fn print_error(&self, error: &str) {
        eprintln!("{} {}", "Error:".red().bold(), error);
    }

    /// Read a line of input from the user
    pub fn read_input(&self, prompt: &str) -> io::Result<String> {
        print!("{} ", format!("{}>", prompt).color(self.user_color).bold());
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(input.trim().to_string())
    }

    /// Print a welcome banner
    pub fn print_banner(&self) {
        println!("{}", "=".repeat(60).bright_blue());
        println!("{}", "  Shadow Sessions - background agent runtime".bright_blue().bold());
        println!("{}", "=".repeat(60).bright_blue());
        println!();
        println!("Type a message to prompt the current session. Commands:");
        println!("  /new [persistence-id]     create a session and switch to it");
        println!("  /watch <role> [peer|supervisor]  create a watcher of the current session");
        println!("  /switch <n>               switch to session number n from /list");
        println!("  /detach  /attach          stop or resume live output (attach replays)");
        println!("  /list  /compact  /interrupt  /destroy  /quit");
        println!();
    }

    /// Print a separator line
    pub fn print_separator(&self) {
        println!("{}", "-".repeat(60).bright_black());
    }

    /// Print a tool action message
    pub fn print_tool_action(&self, tool_name: &str, action: &str) {
        println!(
            "{} {} {}",
            "Tool:".color(self.tool_color).bold(),
            format!("[{}]", tool_name).color(self.tool_color),
            action
        );
    }

    /// Print a tool result
    pub fn print_tool_result(&self, tool_name: &str, result: &str) {
        let preview: String = result.lines().take(5).collect::<Vec<_>>().join("\n");
        println!(
            "{} {}",
            format!("[{}] ->", tool_name).color(self.tool_color),
            preview.bright_black()
        );
    }

    /// Print the session table, marking the current session
    pub fn print_sessions(&self, sessions: &[SessionInfo], current: Option<uuid::Uuid>) {
        self.print_separator();
        for (index, info) in sessions.iter().enumerate() {
            let marker = if Some(info.id) == current { "*" } else { " " };
            let status = match info.status {
                SessionStatus::Idle => info.status.to_string().green(),
                SessionStatus::Running => info.status.to_string().yellow(),
                SessionStatus::Interrupting => info.status.to_string().red(),
            };
            let mut line = format!(
                "{} {:>2}  {}  {:<12} items={:<4} tokens={:<7} watchers={}",
                marker,
                index,
                &info.id.to_string()[..8],
                status,
                info.buffered_item_count,
                info.tokens.total(),
                info.watcher_count
            );
            if let Some(role) = &info.role {
                line.push_str(&format!("  role={}", role));
            }
            if let Some(parent) = info.parent {
                line.push_str(&format!("  watching={}", &parent.to_string()[..8]));
            }
            if let Some(persistence_id) = &info.persistence_id {
                line.push_str(&format!("  persisted-as={}", persistence_id));
            }
            println!("{}", line);
        }
        self.print_separator();
    }
}

fn flush() {
    // Best effort; a closed stdout only loses display output.
    let _ = io::stdout().flush();
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}
