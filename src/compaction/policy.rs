//! Compaction trigger policy
//!
//! Pure functions over token counts and model limits. The boundary
//! conditions here are exact: equality with the usable context never
//! triggers, and an unknown max-output falls back to the full reservation.

use serde::{Deserialize, Serialize};

use crate::core::TokenState;

/// Upper bound on the output reservation carved out of the context window
pub const SESSION_OUTPUT_TOKEN_MAX: u64 = 32_000;

/// Headroom left free when sizing the history a summary may cover
pub const AUTOCOMPACT_BUFFER: u64 = 50_000;

/// Fraction of the window used as summarization budget for small windows
const SMALL_WINDOW_BUDGET_RATIO: f64 = 0.8;

/// Context limits of the model a session talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLimits {
    /// Total context window; 0 means unlimited
    pub context_window: u64,
    /// Maximum output tokens per request; 0 means unknown
    pub max_output_tokens: u64,
}

impl ModelLimits {
    /// Create model limits
    pub fn new(context_window: u64, max_output_tokens: u64) -> Self {
        Self {
            context_window,
            max_output_tokens,
        }
    }
}

impl Default for ModelLimits {
    fn default() -> Self {
        Self::new(200_000, 8_192)
    }
}

/// Switches that override the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompactionFlags {
    /// Never trigger automatic compaction
    #[serde(default)]
    pub disable_auto_compaction: bool,
}

/// Tokens reserved for the model's response.
pub fn output_reservation(model: &ModelLimits) -> u64 {
    if model.max_output_tokens == 0 {
        SESSION_OUTPUT_TOKEN_MAX
    } else {
        model.max_output_tokens.min(SESSION_OUTPUT_TOKEN_MAX)
    }
}

/// Tokens of history that fit before compaction is needed.
pub fn usable_context(model: &ModelLimits) -> u64 {
    model
        .context_window
        .saturating_sub(output_reservation(model))
}

/// Decide whether a session must compact after its latest turn.
pub fn should_trigger(model: &ModelLimits, flags: &CompactionFlags, tokens: &TokenState) -> bool {
    if flags.disable_auto_compaction {
        return false;
    }
    if model.context_window == 0 {
        return false;
    }
    tokens.total() > usable_context(model)
}

/// Token budget for the history a compaction summary is built from.
///
/// Windows at or below `AUTOCOMPACT_BUFFER` would go to zero under plain
/// subtraction, so they keep 80% instead.
pub fn summarization_budget(context_window: u64) -> u64 {
    if context_window > AUTOCOMPACT_BUFFER {
        context_window - AUTOCOMPACT_BUFFER
    } else {
        (context_window as f64 * SMALL_WINDOW_BUDGET_RATIO) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sonnet() -> ModelLimits {
        ModelLimits::new(200_000, 8_192)
    }

    fn tokens_summing_to(total: u64) -> TokenState {
        TokenState::new(total - 2_000, 1_500, 500)
    }

    #[test]
    fn test_below_usable_context_does_not_trigger() {
        let tokens = TokenState::new(150_000, 20_000, 5_000);
        assert!(!should_trigger(&sonnet(), &CompactionFlags::default(), &tokens));
    }

    #[test]
    fn test_above_usable_context_triggers() {
        let tokens = tokens_summing_to(195_000);
        assert!(should_trigger(&sonnet(), &CompactionFlags::default(), &tokens));
    }

    #[test]
    fn test_exact_usable_context_does_not_trigger() {
        let model = sonnet();
        assert_eq!(usable_context(&model), 191_808);
        let at_limit = tokens_summing_to(usable_context(&model));
        assert!(!should_trigger(&model, &CompactionFlags::default(), &at_limit));
        let over = tokens_summing_to(usable_context(&model) + 1);
        assert!(should_trigger(&model, &CompactionFlags::default(), &over));
    }

    #[test]
    fn test_cache_reads_count_in_full() {
        let model = sonnet();
        let mostly_cached = TokenState::new(1_000, 190_000, 1_000);
        assert!(should_trigger(&model, &CompactionFlags::default(), &mostly_cached));
    }

    #[test]
    fn test_zero_context_window_never_triggers() {
        let model = ModelLimits::new(0, 8_192);
        let huge = TokenState::new(u64::MAX / 4, u64::MAX / 4, u64::MAX / 4);
        assert!(!should_trigger(&model, &CompactionFlags::default(), &huge));
    }

    #[test]
    fn test_disable_flag_wins() {
        let flags = CompactionFlags {
            disable_auto_compaction: true,
        };
        let overflow = tokens_summing_to(500_000);
        assert!(!should_trigger(&sonnet(), &flags, &overflow));
    }

    #[test]
    fn test_reservation_is_capped() {
        let model = ModelLimits::new(200_000, 64_000);
        assert_eq!(output_reservation(&model), SESSION_OUTPUT_TOKEN_MAX);
        assert_eq!(usable_context(&model), 168_000);
    }

    #[test]
    fn test_unknown_max_output_reserves_full_amount() {
        let model = ModelLimits::new(100_000, 0);
        assert_eq!(output_reservation(&model), SESSION_OUTPUT_TOKEN_MAX);
        assert_eq!(usable_context(&model), 68_000);
        assert!(should_trigger(
            &model,
            &CompactionFlags::default(),
            &tokens_summing_to(68_001)
        ));
    }

    #[test]
    fn test_usable_context_floors_at_zero() {
        let model = ModelLimits::new(10_000, 0);
        assert_eq!(usable_context(&model), 0);
        assert!(should_trigger(
            &model,
            &CompactionFlags::default(),
            &TokenState::new(1, 0, 0)
        ));
        assert!(!should_trigger(
            &model,
            &CompactionFlags::default(),
            &TokenState::default()
        ));
    }

    #[test]
    fn test_summarization_budget() {
        assert_eq!(summarization_budget(200_000), 150_000);
        assert_eq!(summarization_budget(50_000), 40_000);
        assert_eq!(summarization_budget(40_000), 32_000);
        assert_eq!(summarization_budget(0), 0);
    }
}
