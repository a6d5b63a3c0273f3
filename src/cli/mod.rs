//! Terminal front end for the demo binary

pub mod console;
pub mod renderer;

pub use console::Console;
pub use renderer::ConsoleRenderer;
