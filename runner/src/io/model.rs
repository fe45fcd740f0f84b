//! Chat model seam and a model backed by an external command.
//!
//! The command receives the role-tagged transcript on stdin and answers on
//! stdout, either with a JSON [`ModelReply`] or with plain text (taken as the
//! reply content, no tool calls).

use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::types::Message;
use crate::error::ProviderError;
use crate::io::config::{NativeConfig, RunConfig};
use crate::io::process::run_command_with_timeout;
use crate::io::prompt::render_transcript;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// One model turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

pub trait ChatModel {
    fn invoke(&self, messages: &[Message]) -> Result<ModelReply>;
}

impl<M: ChatModel + ?Sized> ChatModel for &M {
    fn invoke(&self, messages: &[Message]) -> Result<ModelReply> {
        (**self).invoke(messages)
    }
}

/// [`ChatModel`] that shells out to `native.command`.
#[derive(Debug, Clone)]
pub struct CommandModel {
    command: Vec<String>,
    provider: Option<String>,
    model: Option<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandModel {
    pub fn new(native: &NativeConfig) -> Self {
        Self {
            command: native.command.clone(),
            provider: None,
            model: None,
            timeout: Duration::from_secs(native.timeout_secs),
            output_limit_bytes: native.output_limit_bytes,
        }
    }

    /// Command model for the configured main provider/model.
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            provider: config.provider.clone(),
            model: config.model.clone(),
            ..Self::new(&config.native)
        }
    }
}

impl ChatModel for CommandModel {
    #[instrument(skip_all, fields(messages = messages.len()))]
    fn invoke(&self, messages: &[Message]) -> Result<ModelReply> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(ProviderError::invalid_value("native.command is not configured").into());
        };
        let transcript = render_transcript(messages)?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(provider) = &self.provider {
            cmd.env("AGENT_RUNNER_PROVIDER", provider);
        }
        if let Some(model) = &self.model {
            cmd.env("AGENT_RUNNER_MODEL", model);
        }

        let output = run_command_with_timeout(
            cmd,
            Some(transcript.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .map_err(|err| ProviderError::invalid_value(format!("model command: {err:#}")))?;

        if output.timed_out {
            return Err(ProviderError::api(format!(
                "model command timed out after {}s",
                self.timeout.as_secs()
            ))
            .into());
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(ProviderError::api(format!(
                "model command exited with {}: {stderr}",
                output.status
            ))
            .into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_reply(stdout.trim()))
    }
}

/// JSON reply when stdout is a reply object, otherwise the raw text.
pub fn parse_reply(stdout: &str) -> ModelReply {
    if stdout.starts_with('{')
        && let Ok(reply) = serde_json::from_str::<ModelReply>(stdout)
    {
        debug!(tool_calls = reply.tool_calls.len(), "parsed structured reply");
        return reply;
    }
    ModelReply::text(stdout)
}
