//! Execution core for an autonomous coding-agent runner.
//!
//! A run drives an [`agents::Agent`] over a task until it completes, retrying
//! transient provider failures with bounded exponential backoff and keeping
//! nested runs consistent through a shared [`run_context::RunContext`]. The
//! crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (token estimates, history
//!   trimming, backoff arithmetic, error classification). No I/O.
//! - **[`io`]**: Side effects (signals, config files, child processes,
//!   console output).
//!
//! Orchestration modules ([`retry`], [`stream`], [`orchestrator`]) combine
//! the two into the retry loop exposed by the CLI.

pub mod agents;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod retry;
pub mod run_context;
pub mod stream;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
