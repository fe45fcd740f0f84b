//! Stable exit codes for `agent-runner` commands.

/// The command succeeded; for `run`, the agent completed.
pub const OK: i32 = 0;
/// Invalid config or arguments, or an error that is not retried.
pub const INVALID: i32 = 1;
/// The run crashed on an unretryable failure.
pub const CRASHED: i32 = 2;
/// Transient failures outlasted `max_retries`.
pub const RETRIES_EXHAUSTED: i32 = 3;
/// The run was interrupted (SIGINT).
pub const INTERRUPTED: i32 = 130;
