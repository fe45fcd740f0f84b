//! Cheap, deterministic token estimates for history budgeting.

use crate::core::types::Message;

/// Conservative ratio: real tokenizers average closer to 4 bytes per token,
/// so this overestimates and trims early rather than late.
pub const BYTES_PER_TOKEN: usize = 2;

/// Fixed cost charged for role tags and message framing.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 3;

/// Estimate the token cost of a single message.
///
/// Monotonic in content length and free of I/O.
pub fn estimate_tokens(message: &Message) -> usize {
    estimate_text_tokens(&message.content) + MESSAGE_OVERHEAD_TOKENS
}

/// Estimate the token cost of raw text (no per-message overhead).
pub fn estimate_text_tokens(text: &str) -> usize {
    text.len() / BYTES_PER_TOKEN
}

/// Sum of [`estimate_tokens`] over a history.
pub fn estimate_messages(messages: &[Message]) -> usize {
    messages.iter().map(estimate_tokens).sum()
}
