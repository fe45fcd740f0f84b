//! Retry policy for failed agent passes: classify, then crash, propagate, or
//! back off and retry.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, error, info, instrument, warn};

use crate::core::backoff::{backoff_delay, is_final_attempt};
use crate::core::classifier::{ErrorClass, classify};
use crate::error::{Interrupted, MaxRetriesExceeded, describe, is_interrupt};
use crate::io::config::RetryConfig;
use crate::io::interrupt::InterruptController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Granularity of interrupt checks while backing off.
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(self.base_delay, attempt)
    }
}

/// What the orchestrator does with a classified failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The backoff has elapsed; run another attempt.
    Retry { delay: Duration },
    /// Mark the run crashed with `reason` and stop.
    Crash { reason: String },
}

/// Decide how to handle `err` from the 0-indexed `attempt`.
///
/// Value errors come back unchanged as `Err`. Transient errors on the final
/// attempt become [`MaxRetriesExceeded`]; otherwise this blocks for the
/// backoff delay, returning [`Interrupted`] if an interrupt arrives meanwhile.
#[instrument(skip_all, fields(attempt, max_retries = policy.max_retries))]
pub fn classify_and_handle(
    err: anyhow::Error,
    attempt: u32,
    policy: &RetryPolicy,
    interrupts: &InterruptController,
) -> Result<Disposition> {
    if is_interrupt(&err) {
        return Err(err);
    }
    let description = describe(&err);
    match classify(&description) {
        ErrorClass::Unretryable { reason } => {
            error!(reason = %reason, "unretryable failure");
            Ok(Disposition::Crash { reason })
        }
        ErrorClass::Propagate => {
            debug!(err = %description.message, "propagating non-retryable error");
            Err(err)
        }
        ErrorClass::Transient => {
            if is_final_attempt(attempt, policy.max_retries) {
                error!(err = %description.message, "max retries exceeded");
                return Err(MaxRetriesExceeded {
                    max_retries: policy.max_retries,
                    last_error: description.message,
                }
                .into());
            }
            let delay = policy.delay_for(attempt);
            warn!(
                err = %description.message,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt = attempt + 1,
                max_retries = policy.max_retries,
                "transient failure, backing off"
            );
            wait_interruptibly(delay, policy.poll_interval, interrupts)?;
            Ok(Disposition::Retry { delay })
        }
    }
}

/// Sleep for `delay` in `poll_interval` slices, checking for an interrupt
/// before every slice.
pub fn wait_interruptibly(
    delay: Duration,
    poll_interval: Duration,
    interrupts: &InterruptController,
) -> Result<(), Interrupted> {
    let slice = poll_interval.max(Duration::from_millis(1));
    let start = Instant::now();
    loop {
        interrupts.checkpoint()?;
        let elapsed = start.elapsed();
        if elapsed >= delay {
            return Ok(());
        }
        thread::sleep(slice.min(delay - elapsed));
    }
}

/// Log line for a retry about to start.
pub(crate) fn log_retry(attempt: u32, policy: &RetryPolicy) {
    info!(
        attempt = attempt + 1,
        max_retries = policy.max_retries,
        "retrying agent"
    );
}
