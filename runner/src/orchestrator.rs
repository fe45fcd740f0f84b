//! Top-level retry loop around agent passes.
//!
//! One call runs the agent until it completes, crashes, is interrupted, or
//! fails with an error the caller must handle. Interrupt handling and the run
//! scope are held by guards, so the previous SIGINT handler and the context
//! depth are restored on every exit path.

use std::fmt;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::agents::Agent;
use crate::core::types::{Completion, Message};
use crate::error::{MaxRetriesExceeded, is_interrupt};
use crate::io::config::RunConfig;
use crate::io::interrupt::InterruptController;
use crate::io::render::OutputRenderer;
use crate::io::test_cmd::{TestDecision, TestRunner, execute_test_command};
use crate::retry::{Disposition, RetryPolicy, classify_and_handle, log_retry};
use crate::run_context::RunContext;
use crate::stream::run_agent_stream;

/// How a call to [`run_agent_with_retry`] ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The agent finished a pass (and the test hook, if any, is satisfied).
    Completed(Completion),
    /// This run or a run sharing its context hit an unretryable failure.
    Crashed { message: String },
    /// SIGINT arrived and was observed at a checkpoint.
    Interrupted,
}

impl RunOutcome {
    /// User-facing summary line.
    pub fn message(&self) -> String {
        match self {
            RunOutcome::Completed(completion) if !completion.completion_message.is_empty() => {
                completion.completion_message.clone()
            }
            RunOutcome::Completed(_) => "Agent run completed successfully".to_string(),
            RunOutcome::Crashed { message } => format!("Agent has crashed: {message}"),
            RunOutcome::Interrupted => "Agent run interrupted".to_string(),
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Collaborators of the retry loop.
#[derive(Clone, Copy)]
pub struct RunDeps<'a> {
    pub renderer: &'a dyn OutputRenderer,
    pub interrupts: &'a InterruptController,
    pub retry: RetryPolicy,
    pub test_runner: &'a dyn TestRunner,
}

/// Run `agent` on `prompt`, retrying transient failures with backoff.
///
/// Returns `Err` for value errors (unchanged) and for exhausted retries
/// ([`crate::error::MaxRetriesExceeded`]). Test-command reruns count against
/// `max_retries` like retries do. An interrupt consumed by a nested run on the
/// same context also ends this run as [`RunOutcome::Interrupted`].
#[instrument(skip_all, fields(kind = %agent.kind(), max_retries = deps.retry.max_retries, depth = ctx.depth()))]
pub fn run_agent_with_retry<A: Agent + ?Sized>(
    agent: &A,
    prompt: &str,
    config: &RunConfig,
    ctx: &RunContext,
    deps: &RunDeps<'_>,
) -> Result<RunOutcome> {
    let armed = deps.interrupts.arm()?;
    let scope = ctx.enter_scope();
    info!(depth = scope.depth(), "agent run started");

    let outcome = retry_loop(agent, prompt, config, ctx, deps);

    drop(scope);
    settle(outcome, armed.restore())
}

/// Combine the run's result with the handler restore; a failed restore is
/// logged and never replaces the result.
fn settle(outcome: Result<RunOutcome>, restored: Result<()>) -> Result<RunOutcome> {
    if let Err(err) = restored {
        warn!(err = %format!("{err:#}"), "failed to restore SIGINT handler");
    }
    if let Ok(outcome) = &outcome {
        let signaled = matches!(outcome, RunOutcome::Completed(c) if c.is_signaled());
        info!(outcome = %outcome, signaled, "agent run finished");
    }
    outcome
}

fn interrupted(ctx: &RunContext) -> RunOutcome {
    ctx.mark_interrupted();
    RunOutcome::Interrupted
}

fn retry_loop<A: Agent + ?Sized>(
    agent: &A,
    prompt: &str,
    config: &RunConfig,
    ctx: &RunContext,
    deps: &RunDeps<'_>,
) -> Result<RunOutcome> {
    let mut input = vec![Message::human(prompt)];
    let mut test_attempts = 0u32;
    let mut attempt = 0u32;
    let mut rerun_pending = false;

    while attempt < deps.retry.max_retries {
        if deps.interrupts.checkpoint().is_err() || ctx.is_interrupted() {
            return Ok(interrupted(ctx));
        }
        if let Some(message) = ctx.crash_message() {
            warn!(message = %message, "context already crashed; not running agent");
            return Ok(RunOutcome::Crashed { message });
        }

        let err = match run_agent_stream(
            agent,
            &input,
            config,
            ctx,
            deps.renderer,
            deps.interrupts,
        ) {
            Ok(()) if ctx.is_interrupted() => return Ok(interrupted(ctx)),
            Ok(()) => {
                match execute_test_command(deps.test_runner, config, prompt, &mut test_attempts)? {
                    TestDecision::Rerun { prompt } => {
                        input = vec![Message::human(prompt)];
                        attempt += 1;
                        rerun_pending = true;
                        continue;
                    }
                    TestDecision::Done => return Ok(RunOutcome::Completed(ctx.completion())),
                }
            }
            Err(err) => err,
        };

        rerun_pending = false;
        if is_interrupt(&err) {
            return Ok(interrupted(ctx));
        }
        match classify_and_handle(err, attempt, &deps.retry, deps.interrupts) {
            Ok(Disposition::Crash { reason }) => {
                ctx.mark_crashed(reason.clone());
                let message = ctx.crash_message().unwrap_or(reason);
                return Ok(RunOutcome::Crashed { message });
            }
            Ok(Disposition::Retry { .. }) => {
                attempt += 1;
                log_retry(attempt, &deps.retry);
            }
            Err(err) if is_interrupt(&err) => return Ok(interrupted(ctx)),
            Err(err) => return Err(err),
        }
    }

    if rerun_pending {
        warn!(attempt, "attempts used up by test-command reruns");
        return Ok(RunOutcome::Completed(ctx.completion()));
    }
    // Only reachable with max_retries == 0.
    Err(MaxRetriesExceeded {
        max_retries: deps.retry.max_retries,
        last_error: "no attempts allowed".to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::anyhow;
    use serde_json::json;

    use super::*;
    use crate::error::{ProviderError, ToolExecutionError};
    use crate::io::test_cmd::TestResult;
    use crate::test_support::{
        RecordingRenderer, ScriptedAgent, ScriptedRun, ScriptedTestRunner, fast_retry_policy,
    };

    struct Harness {
        renderer: RecordingRenderer,
        interrupts: InterruptController,
        tests: ScriptedTestRunner,
        retry: RetryPolicy,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                renderer: RecordingRenderer::default(),
                interrupts: InterruptController::detached(),
                tests: ScriptedTestRunner::default(),
                retry: fast_retry_policy(),
            }
        }

        fn deps(&self) -> RunDeps<'_> {
            RunDeps {
                renderer: &self.renderer,
                interrupts: &self.interrupts,
                retry: self.retry,
                test_runner: &self.tests,
            }
        }
    }

    fn run(agent: &ScriptedAgent, ctx: &RunContext, harness: &Harness) -> Result<RunOutcome> {
        run_agent_with_retry(agent, "do the task", &RunConfig::default(), ctx, &harness.deps())
    }

    #[test]
    fn success_completes_on_first_pass() {
        let harness = Harness::new();
        let agent = ScriptedAgent::new(vec![ScriptedRun::chunks(vec![json!({"text": "ok"})])]);
        let ctx = RunContext::new();
        let outcome = run(&agent, &ctx, &harness).expect("run");
        assert_eq!(outcome, RunOutcome::Completed(Completion::default()));
        assert_eq!(outcome.message(), "Agent run completed successfully");
        assert_eq!(agent.calls(), 1);
        assert_eq!(ctx.depth(), 0);
        assert_eq!(agent.inputs()[0], vec![Message::human("do the task")]);
    }

    #[test]
    fn completion_message_is_reported() {
        let harness = Harness::new();
        let ctx = RunContext::new();
        let signal = ctx.clone();
        let agent = ScriptedAgent::new(vec![ScriptedRun::chunks(vec![json!({"text": "ok"})])])
            .on_stream(move |_| signal.mark_task_completed("all tests green"));
        let outcome = run(&agent, &ctx, &harness).expect("run");
        assert_eq!(outcome.message(), "all tests green");
        let RunOutcome::Completed(completion) = outcome else {
            panic!("expected completion");
        };
        assert!(completion.task_completed);
    }

    #[test]
    fn transient_failures_retry_then_succeed() {
        let harness = Harness::new();
        let agent = ScriptedAgent::new(vec![
            ScriptedRun::failing(vec![], ProviderError::api("Too many requests").with_http_status(429).into()),
            ScriptedRun::failing(vec![], anyhow!("connection reset")),
            ScriptedRun::chunks(vec![json!({"text": "done"})]),
        ]);
        let outcome = run(&agent, &RunContext::new(), &harness).expect("run");
        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(agent.calls(), 3);
    }

    #[test]
    fn bad_request_crashes_after_one_pass() {
        let harness = Harness::new();
        let agent = ScriptedAgent::new(vec![
            ScriptedRun::failing(vec![], ToolExecutionError::new(Some("shell"), "400 Bad Request").into()),
            ScriptedRun::chunks(vec![]),
        ]);
        let ctx = RunContext::new();
        let outcome = run(&agent, &ctx, &harness).expect("run");
        assert_eq!(agent.calls(), 1);
        assert!(ctx.is_crashed());
        assert_eq!(
            outcome.message(),
            "Agent has crashed: Unretryable error: 400 Bad Request"
        );
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn crashed_context_skips_the_agent() {
        let harness = Harness::new();
        let agent = ScriptedAgent::new(vec![ScriptedRun::chunks(vec![])]);
        let ctx = RunContext::new();
        ctx.mark_crashed("child failed");
        let outcome = run(&agent, &ctx, &harness).expect("run");
        assert_eq!(
            outcome,
            RunOutcome::Crashed {
                message: "child failed".to_string()
            }
        );
        assert_eq!(outcome.message(), "Agent has crashed: child failed");
        assert_eq!(agent.calls(), 0);
    }

    #[test]
    fn value_error_propagates() {
        let harness = Harness::new();
        let agent = ScriptedAgent::new(vec![ScriptedRun::failing(
            vec![],
            ProviderError::invalid_value("unknown provider `foo`").into(),
        )]);
        let ctx = RunContext::new();
        let err = run(&agent, &ctx, &harness).expect_err("propagates");
        assert!(err.downcast_ref::<ProviderError>().is_some());
        assert_eq!(agent.calls(), 1);
        assert_eq!(ctx.depth(), 0);
        assert!(!ctx.is_crashed());
    }

    #[test]
    fn exhaustion_raises_max_retries_exceeded() {
        let harness = Harness::new();
        let agent = ScriptedAgent::new(vec![
            ScriptedRun::failing(vec![], anyhow!("rate limit")),
            ScriptedRun::failing(vec![], anyhow!("rate limit")),
            ScriptedRun::failing(vec![], anyhow!("rate limit")),
        ]);
        let err = run(&agent, &RunContext::new(), &harness).expect_err("exhausted");
        let exceeded = err.downcast_ref::<MaxRetriesExceeded>().expect("typed");
        assert_eq!(exceeded.max_retries, harness.retry.max_retries);
        assert_eq!(agent.calls(), harness.retry.max_retries as usize);
    }

    #[test]
    fn interrupt_before_pass_cancels() {
        let harness = Harness::new();
        harness.interrupts.request();
        let agent = ScriptedAgent::new(vec![ScriptedRun::chunks(vec![])]);
        let outcome = run(&agent, &RunContext::new(), &harness).expect("run");
        assert_eq!(outcome, RunOutcome::Interrupted);
        assert_eq!(outcome.message(), "Agent run interrupted");
        assert_eq!(agent.calls(), 0);
    }

    #[test]
    fn interrupt_during_backoff_cancels() {
        let mut harness = Harness::new();
        harness.retry = RetryPolicy {
            base_delay: Duration::from_secs(60),
            ..harness.retry
        };
        let trigger = harness.interrupts.clone();
        let agent = ScriptedAgent::new(vec![
            ScriptedRun::failing(vec![], anyhow!("429")),
            ScriptedRun::chunks(vec![]),
        ])
        .on_stream(move |_| trigger.request());
        let outcome = run(&agent, &RunContext::new(), &harness).expect("run");
        assert_eq!(outcome, RunOutcome::Interrupted);
        assert_eq!(agent.calls(), 1);
    }

    #[test]
    fn failing_tests_rerun_with_augmented_prompt() {
        let mut harness = Harness::new();
        harness.tests = ScriptedTestRunner::new(vec![
            TestResult {
                success: false,
                output: "1 test failed".to_string(),
            },
            TestResult {
                success: true,
                output: String::new(),
            },
        ]);
        let config = RunConfig {
            test_cmd: Some("cargo test".to_string()),
            auto_test: true,
            ..RunConfig::default()
        };
        let agent = ScriptedAgent::new(vec![
            ScriptedRun::chunks(vec![]),
            ScriptedRun::chunks(vec![]),
        ]);
        let outcome = run_agent_with_retry(
            &agent,
            "fix parser",
            &config,
            &RunContext::new(),
            &harness.deps(),
        )
        .expect("run");
        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(agent.calls(), 2);
        assert_eq!(
            agent.inputs()[1],
            vec![Message::human(
                "fix parser. Previous attempt failed with: <test_cmd_outputs>1 test failed</test_cmd_outputs>"
            )]
        );
        assert_eq!(harness.tests.calls(), 2);
    }

    #[test]
    fn test_reruns_consume_attempts() {
        let mut harness = Harness::new();
        let failing = || TestResult {
            success: false,
            output: "still failing".to_string(),
        };
        harness.tests = ScriptedTestRunner::new(vec![failing(), failing(), failing()]);
        let config = RunConfig {
            test_cmd: Some("cargo test".to_string()),
            auto_test: true,
            max_test_cmd_retries: 10,
            ..RunConfig::default()
        };
        let agent = ScriptedAgent::new(vec![
            ScriptedRun::chunks(vec![]),
            ScriptedRun::chunks(vec![]),
            ScriptedRun::chunks(vec![]),
        ]);
        let outcome =
            run_agent_with_retry(&agent, "fix parser", &config, &RunContext::new(), &harness.deps())
                .expect("run");
        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(agent.calls(), harness.retry.max_retries as usize);
        assert_eq!(harness.tests.calls(), harness.retry.max_retries as usize);
    }

    #[test]
    fn rerun_and_retry_share_the_attempt_budget() {
        let mut harness = Harness::new();
        harness.tests = ScriptedTestRunner::new(vec![TestResult {
            success: false,
            output: "1 test failed".to_string(),
        }]);
        let config = RunConfig {
            test_cmd: Some("cargo test".to_string()),
            auto_test: true,
            ..RunConfig::default()
        };
        let agent = ScriptedAgent::new(vec![
            ScriptedRun::chunks(vec![]),
            ScriptedRun::failing(vec![], anyhow!("rate limit")),
            ScriptedRun::failing(vec![], anyhow!("rate limit")),
        ]);
        let err = run_agent_with_retry(&agent, "fix parser", &config, &RunContext::new(), &harness.deps())
            .expect_err("exhausted");
        assert!(err.downcast_ref::<MaxRetriesExceeded>().is_some());
        assert_eq!(agent.calls(), 3);
    }

    #[test]
    fn failed_handler_restore_keeps_the_outcome() {
        let crashed = RunOutcome::Crashed {
            message: "Unretryable error: 400".to_string(),
        };
        let kept = settle(Ok(crashed.clone()), Err(anyhow!("sigaction failed"))).expect("outcome");
        assert_eq!(kept, crashed);

        let exhausted: Result<RunOutcome> = Err(MaxRetriesExceeded {
            max_retries: 3,
            last_error: "rate limit".to_string(),
        }
        .into());
        let err = settle(exhausted, Err(anyhow!("sigaction failed"))).expect_err("error kept");
        assert!(err.downcast_ref::<MaxRetriesExceeded>().is_some());
    }

    #[test]
    fn interrupt_consumed_by_nested_run_stops_the_parent() {
        let harness = Harness::new();
        let ctx = RunContext::new();
        let inner_ctx = ctx.clone();
        let interrupts = harness.interrupts.clone();
        let inner_renderer = RecordingRenderer::default();
        let inner_tests = ScriptedTestRunner::default();
        let retry = harness.retry;

        let outer = ScriptedAgent::new(vec![ScriptedRun::chunks(vec![json!({"text": "outer"})])])
            .on_stream(move |_| {
                interrupts.request();
                let inner = ScriptedAgent::new(vec![ScriptedRun::chunks(vec![])]);
                let deps = RunDeps {
                    renderer: &inner_renderer,
                    interrupts: &interrupts,
                    retry,
                    test_runner: &inner_tests,
                };
                let outcome =
                    run_agent_with_retry(&inner, "sub task", &RunConfig::default(), &inner_ctx, &deps)
                        .expect("inner run");
                assert_eq!(outcome, RunOutcome::Interrupted);
                assert_eq!(inner.calls(), 0);
            });

        let outcome = run(&outer, &ctx, &harness).expect("outer run");
        assert_eq!(outcome, RunOutcome::Interrupted);
        assert_eq!(outer.calls(), 1);
        assert_eq!(ctx.depth(), 0);
        assert!(!ctx.is_interrupted());

        let again = ScriptedAgent::new(vec![ScriptedRun::chunks(vec![])]);
        let outcome = run(&again, &ctx, &harness).expect("fresh run");
        assert!(matches!(outcome, RunOutcome::Completed(_)));
    }

    #[test]
    fn nested_runs_share_crash_latch() {
        let harness = Harness::new();
        let ctx = RunContext::new();
        let inner_ctx = ctx.clone();
        let inner_deps_interrupts = InterruptController::detached();
        let inner_renderer = RecordingRenderer::default();
        let inner_tests = ScriptedTestRunner::default();
        let retry = harness.retry;

        let outer = ScriptedAgent::new(vec![ScriptedRun::chunks(vec![])]).on_stream(move |_| {
            let inner = ScriptedAgent::new(vec![ScriptedRun::failing(
                vec![],
                ProviderError::api("400 Bad Request").into(),
            )]);
            let deps = RunDeps {
                renderer: &inner_renderer,
                interrupts: &inner_deps_interrupts,
                retry,
                test_runner: &inner_tests,
            };
            assert_eq!(inner_ctx.depth(), 1);
            let outcome = run_agent_with_retry(&inner, "sub task", &RunConfig::default(), &inner_ctx, &deps)
                .expect("inner run");
            assert!(matches!(outcome, RunOutcome::Crashed { .. }));
            assert_eq!(inner_ctx.depth(), 1);
        });

        let outcome = run(&outer, &ctx, &harness).expect("outer run");
        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert!(ctx.is_crashed());
        assert_eq!(
            ctx.crash_message().as_deref(),
            Some("Unretryable API error: 400 Bad Request")
        );

        // A later run on the same context short-circuits.
        let again = ScriptedAgent::new(vec![ScriptedRun::chunks(vec![])]);
        let outcome = run(&again, &ctx, &harness).expect("run");
        assert!(matches!(outcome, RunOutcome::Crashed { .. }));
        assert_eq!(again.calls(), 0);
        assert_eq!(ctx.depth(), 0);
    }
}
