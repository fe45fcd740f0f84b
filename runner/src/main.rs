//! `agent-runner`: drive a coding agent over a task with retries.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

use agent_runner::agents::native::{PlanCompletedTool, TaskCompletedTool};
use agent_runner::agents::{Agent, ToolSet, create_agent};
use agent_runner::core::models::get_model_token_limit;
use agent_runner::core::types::AgentType;
use agent_runner::error::MaxRetriesExceeded;
use agent_runner::exit_codes;
use agent_runner::io::config::{DEFAULT_CONFIG_PATH, RunConfig, load_config, write_config};
use agent_runner::io::interrupt::InterruptController;
use agent_runner::io::model::CommandModel;
use agent_runner::io::render::ConsoleRenderer;
use agent_runner::io::test_cmd::ShellTestRunner;
use agent_runner::logging;
use agent_runner::orchestrator::{RunDeps, RunOutcome, run_agent_with_retry};
use agent_runner::retry::RetryPolicy;
use agent_runner::run_context::RunContext;

#[derive(Parser)]
#[command(
    name = "agent-runner",
    version,
    about = "Run a coding agent over a task, retrying transient failures"
)]
struct Cli {
    /// Config file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent on TASK until it completes, crashes or is interrupted.
    Run {
        /// Task description handed to the agent.
        task: String,
        /// Override `retry.max_retries`.
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Print the effective configuration.
    Config {
        /// Write the effective configuration to the config path.
        #[arg(long)]
        write: bool,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            if err.downcast_ref::<MaxRetriesExceeded>().is_some() {
                exit_codes::RETRIES_EXHAUSTED
            } else {
                exit_codes::INVALID
            }
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_config(&cli.config)?;
    match cli.command {
        Command::Run { task, max_retries } => cmd_run(&config, &task, max_retries),
        Command::Config { write } => cmd_config(&cli.config, &config, write),
    }
}

fn cmd_run(config: &RunConfig, task: &str, max_retries: Option<u32>) -> Result<i32> {
    if task.trim().is_empty() {
        bail!("task must not be empty");
    }
    let mut retry = RetryPolicy::from_config(&config.retry);
    if let Some(max_retries) = max_retries {
        if max_retries == 0 {
            bail!("--max-retries must be > 0");
        }
        retry = retry.with_max_retries(max_retries);
    }

    let ctx = RunContext::new();
    let tools = ToolSet::new()
        .with(TaskCompletedTool::new(ctx.clone()))
        .with(PlanCompletedTool::new(ctx.clone()));
    let agent = create_agent(
        CommandModel::from_config(config),
        tools,
        config,
        AgentType::Default,
    );
    debug!(kind = %agent.kind(), "agent ready");

    let interrupts = InterruptController::process();
    let deps = RunDeps {
        renderer: &ConsoleRenderer,
        interrupts: &interrupts,
        retry,
        test_runner: &ShellTestRunner,
    };
    let outcome = run_agent_with_retry(&agent, task, config, &ctx, &deps)?;
    println!("{}", outcome.message());

    Ok(match outcome {
        RunOutcome::Completed(_) => exit_codes::OK,
        RunOutcome::Crashed { .. } => exit_codes::CRASHED,
        RunOutcome::Interrupted => exit_codes::INTERRUPTED,
    })
}

fn cmd_config(path: &Path, config: &RunConfig, write: bool) -> Result<i32> {
    if write {
        write_config(path, config)?;
        println!("wrote {}", path.display());
        return Ok(exit_codes::OK);
    }
    print!("{}", toml::to_string_pretty(config)?);

    let pair = |p: Option<(&str, &str)>| {
        p.map(|(provider, model)| format!("{provider}/{model}"))
            .unwrap_or_else(|| "unset".to_string())
    };
    println!();
    println!("# model: {}", pair(config.model_for(AgentType::Default)));
    println!("# research model: {}", pair(config.model_for(AgentType::Research)));
    println!("# planner model: {}", pair(config.model_for(AgentType::Planner)));
    println!("# expert model: {}", pair(config.expert_model()));
    match get_model_token_limit(config, AgentType::Default) {
        Some(limit) => println!("# token limit: {limit}"),
        None => println!("# token limit: unknown"),
    }
    Ok(exit_codes::OK)
}
