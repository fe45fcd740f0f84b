//! Agent that delegates each pass to an external executor process.
//!
//! The transcript goes to the executor's stdin; every stdout line becomes one
//! chunk. The exit status is checked once stdout closes, and the executor
//! timeout bounds the whole pass from spawn to exit.

use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::agents::{Agent, ChunkStream};
use crate::core::trim::trim_history;
use crate::core::types::{AgentKind, Chunk, Message};
use crate::error::ProviderError;
use crate::io::config::{ExecutorConfig, RunConfig};
use crate::io::process::{StreamingChild, spawn_streaming};
use crate::io::prompt::render_transcript;

#[derive(Debug, Clone)]
pub struct DelegatedAgent {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    token_limit: Option<usize>,
}

impl DelegatedAgent {
    /// `token_limit` trims the transcript before it is sent; `None` sends it whole.
    pub fn new(executor: &ExecutorConfig, token_limit: Option<usize>) -> Self {
        Self {
            command: executor.command.clone(),
            timeout: Duration::from_secs(executor.timeout_secs),
            output_limit_bytes: executor.output_limit_bytes,
            token_limit,
        }
    }

    pub fn token_limit(&self) -> Option<usize> {
        self.token_limit
    }
}

impl Agent for DelegatedAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Delegated
    }

    #[instrument(skip_all, fields(messages = input.len(), token_limit = ?self.token_limit))]
    fn stream(&self, input: &[Message], config: &RunConfig) -> Result<ChunkStream<'_>> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(ProviderError::invalid_value("executor.command is empty").into());
        };
        let messages = match self.token_limit {
            Some(limit) => trim_history(input, limit),
            None => input.to_vec(),
        };
        if messages.len() < input.len() {
            debug!(
                before = input.len(),
                after = messages.len(),
                "trimmed transcript"
            );
        }
        let transcript = render_transcript(&messages)?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(provider) = &config.provider {
            cmd.env("AGENT_RUNNER_PROVIDER", provider);
        }
        if let Some(model) = &config.model {
            cmd.env("AGENT_RUNNER_MODEL", model);
        }

        info!(program = %program, "starting executor");
        let child = spawn_streaming(
            cmd,
            Some(transcript.into_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .map_err(|err| ProviderError::invalid_value(format!("executor: {err:#}")))?;

        Ok(Box::new(ExecutorStream {
            child: Some(child),
            timeout: self.timeout,
        }))
    }
}

/// Lines of a running executor, surfaced as chunks.
struct ExecutorStream {
    child: Option<StreamingChild>,
    timeout: Duration,
}

impl ExecutorStream {
    fn finish(&mut self) -> Option<Result<Chunk>> {
        let child = self.child.take()?;
        let exit = match child.finish() {
            Ok(exit) => exit,
            Err(err) => return Some(Err(err)),
        };
        if exit.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "executor timed out");
            return Some(Err(ProviderError::api(format!(
                "executor timed out after {}s",
                self.timeout.as_secs()
            ))
            .into()));
        }
        if !exit.status.success() {
            warn!(exit_code = ?exit.status.code(), "executor failed");
            return Some(Err(ProviderError::api(format!(
                "executor exited with {}: {}",
                exit.status,
                exit.stderr_text()
            ))
            .into()));
        }
        debug!("executor completed");
        None
    }
}

impl Iterator for ExecutorStream {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let child = self.child.as_mut()?;
            match child.next_line() {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Some(Ok(line_to_chunk(&line))),
                Ok(None) => return self.finish(),
                Err(err) => {
                    // Dropping the child kills it.
                    self.child = None;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// JSON objects pass through; anything else is wrapped as `{"text": line}`.
pub fn line_to_chunk(line: &str) -> Chunk {
    match serde_json::from_str::<Value>(line) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({ "text": line }),
    }
}
