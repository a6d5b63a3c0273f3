//! Token accounting

use serde::{Deserialize, Serialize};

/// Context occupancy reported by the provider for a session's latest request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenState {
    /// Uncached input tokens
    pub input_tokens: u64,
    /// Input tokens served from the prompt cache
    pub cache_read_tokens: u64,
    /// Generated tokens
    pub output_tokens: u64,
}

impl TokenState {
    /// Create a token state
    pub fn new(input_tokens: u64, cache_read_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            cache_read_tokens,
            output_tokens,
        }
    }

    /// Plain sum of all three counters. Cached tokens are not discounted.
    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.cache_read_tokens)
            .saturating_add(self.output_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_counts_cache_reads() {
        let tokens = TokenState::new(150_000, 20_000, 5_000);
        assert_eq!(tokens.total(), 175_000);
        assert_eq!(TokenState::default().total(), 0);
    }

    #[test]
    fn test_total_saturates() {
        let tokens = TokenState::new(u64::MAX, 1, 1);
        assert_eq!(tokens.total(), u64::MAX);
    }
}
