//! Conversation compaction
//!
//! Older turns are condensed into a provider-written summary while the most
//! recent turns are kept verbatim. Nothing is mutated here: the caller swaps
//! in the returned history only when compaction succeeds.

use serde::{Deserialize, Serialize};

use super::policy::summarization_budget;
use super::turns::{estimate_message_tokens, estimate_tokens, group_turns, ConversationTurn};
use crate::core::{CompactionError, TokenState};
use crate::llm::{LlmProvider, Message};

/// Number of recent turns kept verbatim by default
pub const DEFAULT_KEEP_RECENT_TURNS: usize = 3;

/// Compression ratio below which a compaction is reported as weak
pub const DEFAULT_MIN_COMPRESSION_RATIO: f64 = 0.6;

/// Appended after the summary so the model knows the history was condensed
pub const CONTINUATION_MESSAGE: &str = "This session is being continued from a previous conversation that ran out of context. The conversation is summarized above.";

/// Outcome metrics of a compaction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompactionResult {
    /// Tokens before compaction
    pub original_tokens: u64,
    /// Tokens after compaction
    pub compacted_tokens: u64,
    /// `1 - compacted / original`, within `[0, 1]`
    pub compression_ratio: f64,
    /// Turns folded into the summary
    pub turns_summarized: usize,
    /// Turns kept verbatim
    pub turns_kept: usize,
}

impl CompactionResult {
    /// Result for a session with no history
    pub fn nothing_to_compact() -> Self {
        Self {
            original_tokens: 0,
            compacted_tokens: 0,
            compression_ratio: 0.0,
            turns_summarized: 0,
            turns_kept: 0,
        }
    }

    /// Check if the compaction changed nothing
    pub fn is_noop(&self) -> bool {
        self.turns_summarized == 0
    }
}

/// History and token state that replace the session's on success
#[derive(Debug, Clone, PartialEq)]
pub struct CompactedHistory {
    /// Rebuilt conversation
    pub messages: Vec<Message>,
    /// Token state matching `messages`
    pub tokens: TokenState,
    /// Metrics
    pub result: CompactionResult,
}

/// What `Compactor::compact` produced
#[derive(Debug, Clone, PartialEq)]
pub enum CompactionOutcome {
    /// The session had no messages; the provider was not contacted
    NothingToCompact,
    /// A new history is ready to be swapped in
    Compacted(CompactedHistory),
}

impl CompactionOutcome {
    /// Metrics of this outcome
    pub fn result(&self) -> CompactionResult {
        match self {
            CompactionOutcome::NothingToCompact => CompactionResult::nothing_to_compact(),
            CompactionOutcome::Compacted(history) => history.result,
        }
    }
}

/// Summarizes older turns and keeps recent ones
#[derive(Debug, Clone)]
pub struct Compactor {
    keep_recent_turns: usize,
    min_compression_ratio: f64,
    summarization_budget: u64,
}

impl Compactor {
    /// Create a compactor for a model with the given context window
    pub fn new(keep_recent_turns: usize, min_compression_ratio: f64, context_window: u64) -> Self {
        Self {
            keep_recent_turns,
            min_compression_ratio,
            summarization_budget: summarization_budget(context_window),
        }
    }

    /// Compact `messages`.
    ///
    /// At least one turn is always summarized, so a history with fewer turns
    /// than `keep_recent_turns` still shrinks.
    pub async fn compact(
        &self,
        messages: &[Message],
        current: &TokenState,
        provider: &dyn LlmProvider,
    ) -> Result<CompactionOutcome, CompactionError> {
        if messages.is_empty() {
            return Ok(CompactionOutcome::NothingToCompact);
        }

        let mut turns = group_turns(messages);
        let keep = self.keep_recent_turns.min(turns.len().saturating_sub(1));
        let kept = turns.split_off(turns.len() - keep);
        let summarized = turns;

        let prompt = self.summary_prompt(&summarized);
        let summary = provider
            .summarize(&prompt)
            .await
            .map_err(|e| CompactionError::Provider(e.to_string()))?;

        let mut rebuilt: Vec<Message> = kept
            .into_iter()
            .flat_map(ConversationTurn::into_messages)
            .collect();
        rebuilt.push(Message::user(summary));
        rebuilt.push(Message::user(CONTINUATION_MESSAGE));

        let original_tokens = if current.total() > 0 {
            current.total()
        } else {
            messages.iter().map(estimate_message_tokens).sum()
        };
        let compacted_tokens: u64 = rebuilt.iter().map(estimate_message_tokens).sum();
        let result = CompactionResult {
            original_tokens,
            compacted_tokens,
            compression_ratio: compression_ratio(original_tokens, compacted_tokens),
            turns_summarized: summarized.len(),
            turns_kept: keep,
        };

        if result.compression_ratio < self.min_compression_ratio {
            tracing::warn!(
                ratio = result.compression_ratio,
                target = self.min_compression_ratio,
                "Compaction achieved less compression than targeted"
            );
        }

        Ok(CompactionOutcome::Compacted(CompactedHistory {
            messages: rebuilt,
            tokens: TokenState::new(compacted_tokens, 0, 0),
            result,
        }))
    }

    /// Transcript of the turns to summarize, newest turns first to survive
    /// the budget cut.
    fn summary_prompt(&self, turns: &[ConversationTurn]) -> String {
        let mut sections = Vec::new();
        let mut used = 0u64;
        let mut omitted = 0usize;
        for turn in turns.iter().rev() {
            let section = render_turn(turn);
            let cost = estimate_tokens(&section);
            if used + cost > self.summarization_budget && !sections.is_empty() {
                omitted += 1;
                continue;
            }
            used += cost;
            sections.push(section);
        }
        sections.reverse();

        let mut prompt = String::from(
            "Summarize the conversation below so that it can be continued without it. \
             Keep goals, decisions, file paths, errors and unfinished work.\n\n",
        );
        if omitted > 0 {
            prompt.push_str(&format!("[{} earlier turns omitted]\n\n", omitted));
        }
        prompt.push_str(&sections.join("\n"));
        prompt
    }
}

impl Default for Compactor {
    fn default() -> Self {
        Self::new(DEFAULT_KEEP_RECENT_TURNS, DEFAULT_MIN_COMPRESSION_RATIO, 200_000)
    }
}

fn render_turn(turn: &ConversationTurn) -> String {
    let mut out = String::new();
    let user = turn.user_text();
    if !user.is_empty() {
        out.push_str(&format!("User: {}\n", user));
    }
    let tools = turn.tool_names();
    if !tools.is_empty() {
        out.push_str(&format!("Tools: {}\n", tools.join(", ")));
    }
    let assistant = turn.assistant_text();
    if !assistant.is_empty() {
        out.push_str(&format!("Assistant: {}\n", assistant));
    }
    out
}

fn compression_ratio(original: u64, compacted: u64) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (1.0 - compacted as f64 / original as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedProvider;

    fn long_history(turns: usize) -> Vec<Message> {
        (0..turns)
            .flat_map(|i| {
                vec![
                    Message::user(format!("question {} {}", i, "x".repeat(400))),
                    Message::assistant(format!("answer {} {}", i, "y".repeat(400))),
                ]
            })
            .collect()
    }

    #[tokio::test]
    async fn test_empty_history_skips_provider() {
        let provider = ScriptedProvider::new();
        let outcome = Compactor::default()
            .compact(&[], &TokenState::default(), &provider)
            .await
            .unwrap();
        assert_eq!(outcome, CompactionOutcome::NothingToCompact);
        assert!(outcome.result().is_noop());
        assert_eq!(provider.summarize_calls(), 0);
    }

    #[tokio::test]
    async fn test_keeps_recent_turns_and_appends_summary() {
        let provider = ScriptedProvider::new();
        provider.push_summary(Ok("short summary".into()));
        let history = long_history(6);

        let outcome = Compactor::default()
            .compact(&history, &TokenState::default(), &provider)
            .await
            .unwrap();
        let CompactionOutcome::Compacted(compacted) = outcome else {
            panic!("expected compaction");
        };

        assert_eq!(compacted.result.turns_summarized, 3);
        assert_eq!(compacted.result.turns_kept, 3);
        assert_eq!(compacted.messages.len(), 3 * 2 + 2);
        assert_eq!(compacted.messages[0], history[6]);
        assert_eq!(compacted.messages[6].text(), "short summary");
        assert_eq!(compacted.messages[7].text(), CONTINUATION_MESSAGE);
        assert!(compacted.result.compression_ratio > 0.0);
        assert_eq!(
            compacted.tokens,
            TokenState::new(compacted.result.compacted_tokens, 0, 0)
        );
    }

    #[tokio::test]
    async fn test_short_history_still_summarizes_one_turn() {
        let provider = ScriptedProvider::new();
        let history = long_history(2);
        let outcome = Compactor::default()
            .compact(&history, &TokenState::default(), &provider)
            .await
            .unwrap();
        let result = outcome.result();
        assert_eq!(result.turns_summarized, 1);
        assert_eq!(result.turns_kept, 1);
        assert_eq!(provider.summarize_calls(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_is_reported() {
        let provider = ScriptedProvider::new();
        provider.push_summary(Err("overloaded".into()));
        let err = Compactor::default()
            .compact(&long_history(4), &TokenState::default(), &provider)
            .await
            .unwrap_err();
        assert_eq!(err, CompactionError::Provider("overloaded".into()));
    }

    #[tokio::test]
    async fn test_original_tokens_prefers_reported_state() {
        let provider = ScriptedProvider::new();
        provider.push_summary(Ok("s".into()));
        let reported = TokenState::new(180_000, 10_000, 2_000);
        let result = Compactor::default()
            .compact(&long_history(5), &reported, &provider)
            .await
            .unwrap()
            .result();
        assert_eq!(result.original_tokens, 192_000);
        assert!(result.compression_ratio > 0.99);
    }

    #[test]
    fn test_summary_prompt_respects_budget() {
        let compactor = Compactor::new(3, 0.6, 50_100);
        let turns = group_turns(&long_history(3));
        let prompt = compactor.summary_prompt(&turns);
        assert!(prompt.contains("[2 earlier turns omitted]"));
        assert!(prompt.contains("question 2"));
        assert!(!prompt.contains("question 0"));
    }

    #[test]
    fn test_compression_ratio_bounds() {
        assert_eq!(compression_ratio(0, 10), 0.0);
        assert_eq!(compression_ratio(100, 200), 0.0);
        assert!((compression_ratio(100, 25) - 0.75).abs() < f64::EPSILON);
    }
}
