//! Context compaction
//!
//! - `policy` - when a session must compact
//! - `turns` - grouping of history into turns, token estimates
//! - `compactor` - summarizing older turns through the provider

pub mod compactor;
pub mod policy;
pub mod turns;

pub use compactor::{
    CompactedHistory, CompactionOutcome, CompactionResult, Compactor, CONTINUATION_MESSAGE,
    DEFAULT_KEEP_RECENT_TURNS, DEFAULT_MIN_COMPRESSION_RATIO,
};
pub use policy::{
    output_reservation, should_trigger, summarization_budget, usable_context, CompactionFlags,
    ModelLimits, AUTOCOMPACT_BUFFER, SESSION_OUTPUT_TOKEN_MAX,
};
pub use turns::{estimate_message_tokens, estimate_tokens, group_turns, ConversationTurn};
