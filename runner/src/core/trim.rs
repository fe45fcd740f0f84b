//! History trimming against a token budget.
//!
//! The first message carries the system instructions and is never dropped.
//! Interior messages are dropped oldest-first; order is never changed.

use crate::core::tokens::estimate_tokens;
use crate::core::types::Message;

/// Trim `messages` to `budget` using [`estimate_tokens`].
pub fn trim_history(messages: &[Message], budget: usize) -> Vec<Message> {
    trim_history_with(messages, budget, estimate_tokens)
}

/// Trim `messages` to `budget` using a caller-supplied estimator.
///
/// - Returns the input unchanged when its total cost fits.
/// - Otherwise keeps the first message plus the longest suffix of the rest
///   that fits in what the first message leaves of the budget.
/// - With two or more messages, the most recent one is always kept, even when
///   it alone exceeds the budget.
pub fn trim_history_with<F>(messages: &[Message], budget: usize, estimate: F) -> Vec<Message>
where
    F: Fn(&Message) -> usize,
{
    let Some((first, rest)) = messages.split_first() else {
        return Vec::new();
    };

    let total: usize = messages.iter().map(&estimate).sum();
    if total <= budget {
        return messages.to_vec();
    }

    let mut remaining = budget.saturating_sub(estimate(first));
    let mut keep = 0usize;
    for message in rest.iter().rev() {
        let cost = estimate(message);
        if cost > remaining {
            break;
        }
        remaining -= cost;
        keep += 1;
    }
    let keep = keep.max(1).min(rest.len());

    let mut trimmed = Vec::with_capacity(keep + 1);
    trimmed.push(first.clone());
    trimmed.extend_from_slice(&rest[rest.len() - keep..]);
    trimmed
}
