//! Post-run test command: run it after a successful agent pass and, when it
//! fails, hand back an augmented prompt for another pass.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::io::config::RunConfig;
use crate::io::process::run_command_with_timeout;
use crate::io::prompt::render_test_retry;

/// One invocation of the configured test command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRequest {
    pub command: String,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    pub success: bool,
    pub output: String,
}

pub trait TestRunner {
    fn run(&self, request: &TestRequest) -> Result<TestResult>;
}

/// Runs the command through `sh -c` in the current directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellTestRunner;

impl TestRunner for ShellTestRunner {
    fn run(&self, request: &TestRequest) -> Result<TestResult> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&request.command);
        let output =
            run_command_with_timeout(cmd, None, request.timeout, request.output_limit_bytes)
                .with_context(|| format!("run test command `{}`", request.command))?;

        let mut text = output.combined_text();
        if output.timed_out {
            text.push_str(&format!(
                "\n[test command timed out after {}s]\n",
                request.timeout.as_secs()
            ));
        }
        Ok(TestResult {
            success: output.succeeded(),
            output: text,
        })
    }
}

/// What the orchestrator does after the test hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestDecision {
    /// Stop; the run is complete.
    Done,
    /// Run the agent again with this prompt.
    Rerun { prompt: String },
}

/// Run the test command when one is configured and enabled.
///
/// `attempts` counts test runs for this orchestrator call and is incremented
/// on every run. A failing run yields [`TestDecision::Rerun`] while fewer than
/// `max_test_cmd_retries` runs have happened.
#[instrument(skip_all, fields(attempts = *attempts))]
pub fn execute_test_command(
    runner: &dyn TestRunner,
    config: &RunConfig,
    original_prompt: &str,
    attempts: &mut u32,
) -> Result<TestDecision> {
    let Some(command) = config.test_cmd.as_deref().filter(|c| !c.trim().is_empty()) else {
        return Ok(TestDecision::Done);
    };
    if !config.auto_test {
        debug!("auto_test disabled; skipping test command");
        return Ok(TestDecision::Done);
    }
    if *attempts >= config.max_test_cmd_retries {
        warn!(
            max = config.max_test_cmd_retries,
            "test command retries exhausted"
        );
        return Ok(TestDecision::Done);
    }

    let request = TestRequest {
        command: command.to_string(),
        timeout: Duration::from_secs(config.test_cmd_timeout_secs),
        output_limit_bytes: config.test_output_limit_bytes,
    };
    let result = runner.run(&request)?;
    *attempts += 1;

    if result.success {
        info!(attempts = *attempts, "test command passed");
        return Ok(TestDecision::Done);
    }
    if *attempts >= config.max_test_cmd_retries {
        warn!(
            attempts = *attempts,
            "test command failed; no retries left"
        );
        return Ok(TestDecision::Done);
    }

    info!(attempts = *attempts, "test command failed; rerunning agent");
    let prompt = render_test_retry(original_prompt, result.output.trim())?;
    Ok(TestDecision::Rerun { prompt })
}
