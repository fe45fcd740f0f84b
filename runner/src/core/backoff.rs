//! Exponential backoff arithmetic for transient provider failures.

use std::time::Duration;

/// Delay before retrying after the 0-indexed `attempt`: `base * 2^attempt`.
///
/// Saturates instead of overflowing for very large attempts.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

/// Whether `attempt` is the last one allowed by `max_retries`.
pub fn is_final_attempt(attempt: u32, max_retries: u32) -> bool {
    attempt.saturating_add(1) >= max_retries
}
