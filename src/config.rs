//! Runtime configuration
//!
//! Configuration for the session registry and every session it spawns.
//! Loadable from JSON, overridable from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compaction::{
    CompactionFlags, Compactor, ModelLimits, DEFAULT_KEEP_RECENT_TURNS,
    DEFAULT_MIN_COMPRESSION_RATIO,
};
use crate::core::{RuntimeError, RuntimeResult};
use crate::llm::ToolDefinition;
use crate::runtime::channels::{INPUT_CHANNEL_SIZE, OUTPUT_CHANNEL_SIZE};
use crate::session::SESSIONS_DIR;

/// Default silence timeout for watcher sessions (5 seconds)
pub const DEFAULT_SILENCE_TIMEOUT_SECS: u64 = 5;

/// Configuration shared by all sessions of a registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Context limits of the model
    #[serde(default)]
    pub model: ModelLimits,

    /// Compaction switches
    #[serde(default)]
    pub compaction: CompactionFlags,

    /// Commands a session can queue before `send_input` is refused
    #[serde(default = "default_input_queue_capacity")]
    pub input_queue_capacity: usize,

    /// Items a watcher may fall behind before it lags
    #[serde(default = "default_fanout_capacity")]
    pub fanout_capacity: usize,

    /// Turns kept verbatim by compaction
    #[serde(default = "default_keep_recent_turns")]
    pub keep_recent_turns: usize,

    /// Compression ratio below which compaction logs a warning
    #[serde(default = "default_min_compression_ratio")]
    pub min_compression_ratio: f64,

    /// Quiet period after which a watcher evaluates what it has seen
    #[serde(default = "default_silence_timeout_secs")]
    pub watcher_silence_timeout_secs: u64,

    /// Directory for file-backed session histories
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,

    /// Tools advertised to the provider on every turn
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

fn default_input_queue_capacity() -> usize {
    INPUT_CHANNEL_SIZE
}

fn default_fanout_capacity() -> usize {
    OUTPUT_CHANNEL_SIZE
}

fn default_keep_recent_turns() -> usize {
    DEFAULT_KEEP_RECENT_TURNS
}

fn default_min_compression_ratio() -> f64 {
    DEFAULT_MIN_COMPRESSION_RATIO
}

fn default_silence_timeout_secs() -> u64 {
    DEFAULT_SILENCE_TIMEOUT_SECS
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from(SESSIONS_DIR)
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model: ModelLimits::default(),
            compaction: CompactionFlags::default(),
            input_queue_capacity: INPUT_CHANNEL_SIZE,
            fanout_capacity: OUTPUT_CHANNEL_SIZE,
            keep_recent_turns: DEFAULT_KEEP_RECENT_TURNS,
            min_compression_ratio: DEFAULT_MIN_COMPRESSION_RATIO,
            watcher_silence_timeout_secs: DEFAULT_SILENCE_TIMEOUT_SECS,
            sessions_dir: default_sessions_dir(),
            tools: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `SHADOW_*` environment variables
    pub fn from_env() -> RuntimeResult<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps variable names to values
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> RuntimeResult<Self> {
        if let Some(value) = lookup("SHADOW_CONTEXT_WINDOW") {
            self.model.context_window = parse_number("SHADOW_CONTEXT_WINDOW", &value)?;
        }
        if let Some(value) = lookup("SHADOW_MAX_OUTPUT_TOKENS") {
            self.model.max_output_tokens = parse_number("SHADOW_MAX_OUTPUT_TOKENS", &value)?;
        }
        if let Some(value) = lookup("SHADOW_DISABLE_AUTO_COMPACT") {
            self.compaction.disable_auto_compaction =
                matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(value) = lookup("SHADOW_SESSIONS_DIR") {
            self.sessions_dir = PathBuf::from(value);
        }
        self.validate()?;
        Ok(self)
    }

    /// Set the model limits
    pub fn with_model(mut self, model: ModelLimits) -> Self {
        self.model = model;
        self
    }

    /// Enable or disable automatic compaction
    pub fn with_auto_compaction(mut self, enabled: bool) -> Self {
        self.compaction.disable_auto_compaction = !enabled;
        self
    }

    /// Set the input queue capacity
    pub fn with_input_queue_capacity(mut self, capacity: usize) -> Self {
        self.input_queue_capacity = capacity;
        self
    }

    /// Set the fan-out capacity
    pub fn with_fanout_capacity(mut self, capacity: usize) -> Self {
        self.fanout_capacity = capacity;
        self
    }

    /// Set how many recent turns compaction keeps
    pub fn with_keep_recent_turns(mut self, turns: usize) -> Self {
        self.keep_recent_turns = turns;
        self
    }

    /// Set the watcher silence timeout in seconds
    pub fn with_watcher_silence_timeout(mut self, secs: u64) -> Self {
        self.watcher_silence_timeout_secs = secs;
        self
    }

    /// Set the sessions directory
    pub fn with_sessions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sessions_dir = dir.into();
        self
    }

    /// Add a tool advertised to the provider
    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    /// Get the watcher silence timeout as Duration
    pub fn watcher_silence_timeout(&self) -> Duration {
        Duration::from_secs(self.watcher_silence_timeout_secs)
    }

    /// Compactor matching this configuration
    pub fn compactor(&self) -> Compactor {
        Compactor::new(
            self.keep_recent_turns,
            self.min_compression_ratio,
            self.model.context_window,
        )
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.input_queue_capacity == 0 {
            return Err(RuntimeError::invalid_config("input_queue_capacity must be > 0"));
        }
        if self.fanout_capacity == 0 {
            return Err(RuntimeError::invalid_config("fanout_capacity must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.min_compression_ratio) {
            return Err(RuntimeError::invalid_config(
                "min_compression_ratio must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> RuntimeResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| RuntimeError::invalid_config(format!("{} is not a number: {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.input_queue_capacity, 32);
        assert_eq!(config.fanout_capacity, 256);
        assert_eq!(config.keep_recent_turns, 3);
        assert_eq!(config.watcher_silence_timeout(), Duration::from_secs(5));
        assert!(!config.compaction.disable_auto_compaction);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SHADOW_CONTEXT_WINDOW", "100000"),
            ("SHADOW_MAX_OUTPUT_TOKENS", "0"),
            ("SHADOW_DISABLE_AUTO_COMPACT", "true"),
            ("SHADOW_SESSIONS_DIR", "/tmp/shadow"),
        ]
        .into_iter()
        .collect();

        let config = RuntimeConfig::default()
            .with_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.model, ModelLimits::new(100_000, 0));
        assert!(config.compaction.disable_auto_compaction);
        assert_eq!(config.sessions_dir, PathBuf::from("/tmp/shadow"));
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let result = RuntimeConfig::default().with_env_overrides(|key| {
            (key == "SHADOW_CONTEXT_WINDOW").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(RuntimeError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_json_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runtime.json");
        std::fs::write(
            &path,
            r#"{"model": {"context_window": 64000, "max_output_tokens": 4096}, "fanout_capacity": 16}"#,
        )
        .unwrap();

        let config = RuntimeConfig::from_json_file(&path).unwrap();
        assert_eq!(config.model.context_window, 64_000);
        assert_eq!(config.fanout_capacity, 16);
        assert_eq!(config.input_queue_capacity, 32);
    }

    #[test]
    fn test_validate() {
        assert!(RuntimeConfig::default()
            .with_fanout_capacity(0)
            .validate()
            .is_err());
        assert!(RuntimeConfig::default()
            .with_input_queue_capacity(0)
            .validate()
            .is_err());
    }
}
