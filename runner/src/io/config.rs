//! Run configuration stored as TOML (default `.agent-runner/config.toml`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::AgentType;

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".agent-runner/config.toml";

/// Run configuration (TOML).
///
/// Missing fields default to sensible values; a missing file yields
/// `RunConfig::default()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub research_provider: Option<String>,
    pub research_model: Option<String>,
    pub planner_provider: Option<String>,
    pub planner_model: Option<String>,
    pub expert_provider: Option<String>,
    pub expert_model: Option<String>,

    /// Trim history to the model's token limit for providers that need it.
    pub limit_tokens: bool,

    /// Shell command run after a successful agent pass (e.g. `cargo test`).
    pub test_cmd: Option<String>,
    /// Run `test_cmd` without asking.
    pub auto_test: bool,
    pub max_test_cmd_retries: u32,
    pub test_cmd_timeout_secs: u64,
    pub test_output_limit_bytes: usize,

    pub retry: RetryConfig,
    pub executor: ExecutorConfig,
    pub native: NativeConfig,

    /// Per-model overrides: `[models.<provider>.<model>]`.
    pub models: BTreeMap<String, BTreeMap<String, ModelParams>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Granularity at which interrupts are observed during backoff.
    pub poll_interval_ms: u64,
}

/// External executor process used by the delegated agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Command to spawn (e.g. `["codex","exec","--json","-"]`).
    pub command: Vec<String>,
    /// Deadline for one executor pass, from spawn to exit, covering stdout reads.
    pub timeout_secs: u64,
    /// Truncate captured stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Built-in minimal agent loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NativeConfig {
    /// Command that answers one model turn (transcript on stdin). Empty means
    /// no command-backed model is available.
    pub command: Vec<String>,
    pub max_steps: u32,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelParams {
    pub token_limit: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 20,
            base_delay_ms: 1_000,
            poll_interval_ms: 100,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--json".to_string(),
                "-".to_string(),
            ],
            timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            max_steps: 50,
            timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            research_provider: None,
            research_model: None,
            planner_provider: None,
            planner_model: None,
            expert_provider: None,
            expert_model: None,
            limit_tokens: true,
            test_cmd: None,
            auto_test: false,
            max_test_cmd_retries: 5,
            test_cmd_timeout_secs: 10 * 60,
            test_output_limit_bytes: 100_000,
            retry: RetryConfig::default(),
            executor: ExecutorConfig::default(),
            native: NativeConfig::default(),
            models: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_retries == 0 {
            return Err(anyhow!("retry.max_retries must be > 0"));
        }
        if self.retry.poll_interval_ms == 0 {
            return Err(anyhow!("retry.poll_interval_ms must be > 0"));
        }
        if self.executor.command.is_empty() || self.executor.command[0].trim().is_empty() {
            return Err(anyhow!("executor.command must be a non-empty array"));
        }
        if self.executor.timeout_secs == 0 {
            return Err(anyhow!("executor.timeout_secs must be > 0"));
        }
        if self.executor.output_limit_bytes == 0 || self.native.output_limit_bytes == 0 {
            return Err(anyhow!("output limits must be > 0"));
        }
        if self.native.max_steps == 0 {
            return Err(anyhow!("native.max_steps must be > 0"));
        }
        if self
            .native
            .command
            .first()
            .is_some_and(|program| program.trim().is_empty())
        {
            return Err(anyhow!("native.command must not start with an empty program"));
        }
        if self
            .test_cmd
            .as_deref()
            .is_some_and(|cmd| cmd.trim().is_empty())
        {
            return Err(anyhow!("test_cmd must not be blank"));
        }
        if self.test_cmd_timeout_secs == 0 {
            return Err(anyhow!("test_cmd_timeout_secs must be > 0"));
        }
        for (provider, models) in &self.models {
            for (model, params) in models {
                if params.token_limit == 0 {
                    return Err(anyhow!("models.{provider}.{model}.token_limit must be > 0"));
                }
            }
        }
        Ok(())
    }

    /// Provider/model pair for an agent stage, falling back to the main pair.
    pub fn model_for(&self, agent_type: AgentType) -> Option<(&str, &str)> {
        let (provider, model) = match agent_type {
            AgentType::Default => (self.provider.as_deref(), self.model.as_deref()),
            AgentType::Research => (
                self.research_provider.as_deref().or(self.provider.as_deref()),
                self.research_model.as_deref().or(self.model.as_deref()),
            ),
            AgentType::Planner => (
                self.planner_provider.as_deref().or(self.provider.as_deref()),
                self.planner_model.as_deref().or(self.model.as_deref()),
            ),
        };
        Some((provider?, model?))
    }

    /// Provider/model pair for the expert, falling back to the main pair.
    pub fn expert_model(&self) -> Option<(&str, &str)> {
        let provider = self.expert_provider.as_deref().or(self.provider.as_deref())?;
        let model = self.expert_model.as_deref().or(self.model.as_deref())?;
        Some((provider, model))
    }

    /// Token limit configured under `[models]`, if any.
    pub fn configured_token_limit(&self, provider: &str, model: &str) -> Option<usize> {
        self.models
            .get(provider)
            .and_then(|models| models.get(model))
            .map(|params| params.token_limit)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = RunConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    debug!(path = %path.display(), provider = ?cfg.provider, model = ?cfg.model, "config loaded");
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
