//! Built-in minimal agent loop: trim, ask the model, run the tools it
//! requested, repeat until it stops asking or the step cap is hit.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::agents::{Agent, ChunkStream};
use crate::core::trim::trim_history;
use crate::core::types::{AgentKind, Chunk, Message};
use crate::error::ToolExecutionError;
use crate::io::config::RunConfig;
use crate::io::model::{ChatModel, ToolCall};
use crate::run_context::RunContext;

/// A capability the model can call by name.
pub trait Tool {
    fn name(&self) -> &str;
    fn call(&self, arguments: &Value) -> Result<String>;
}

/// Tools available to a native agent, keyed by name.
#[derive(Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tools.keys()).finish()
    }
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any tool with the same name.
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.insert(tool);
        self
    }

    pub fn insert(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Dispatch a call. Every failure comes back as [`ToolExecutionError`].
    pub fn call(&self, call: &ToolCall) -> Result<String> {
        let Some(tool) = self.tools.get(&call.name) else {
            return Err(
                ToolExecutionError::new(Some(&call.name), format!("unknown tool `{}`", call.name))
                    .into(),
            );
        };
        tool.call(&call.arguments).map_err(|err| {
            if err.downcast_ref::<ToolExecutionError>().is_some() {
                err
            } else {
                ToolExecutionError::new(Some(&call.name), format!("{err:#}")).into()
            }
        })
    }
}

/// Signals that the task is done; the message lands in the run's completion.
#[derive(Debug, Clone)]
pub struct TaskCompletedTool {
    ctx: RunContext,
}

impl TaskCompletedTool {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }
}

impl Tool for TaskCompletedTool {
    fn name(&self) -> &str {
        "mark_task_completed"
    }

    fn call(&self, arguments: &Value) -> Result<String> {
        let message = completion_message(arguments);
        self.ctx.mark_task_completed(&message);
        Ok(format!("task marked complete: {message}"))
    }
}

/// Signals that the plan is done.
#[derive(Debug, Clone)]
pub struct PlanCompletedTool {
    ctx: RunContext,
}

impl PlanCompletedTool {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }
}

impl Tool for PlanCompletedTool {
    fn name(&self) -> &str {
        "mark_plan_completed"
    }

    fn call(&self, arguments: &Value) -> Result<String> {
        let message = completion_message(arguments);
        self.ctx.mark_plan_completed(&message);
        Ok(format!("plan marked complete: {message}"))
    }
}

fn completion_message(arguments: &Value) -> String {
    arguments
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| arguments.as_str())
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug)]
pub struct NativeAgent<M> {
    model: M,
    tools: ToolSet,
    max_tokens: usize,
    max_steps: u32,
}

impl<M: ChatModel> NativeAgent<M> {
    pub fn new(model: M, tools: ToolSet, max_tokens: usize, max_steps: u32) -> Self {
        Self {
            model,
            tools,
            max_tokens,
            max_steps,
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }
}

impl<M: ChatModel> Agent for NativeAgent<M> {
    fn kind(&self) -> AgentKind {
        AgentKind::Native
    }

    fn stream(&self, input: &[Message], _config: &RunConfig) -> Result<ChunkStream<'_>> {
        debug!(
            messages = input.len(),
            tools = self.tools.tools.len(),
            "starting native pass"
        );
        Ok(Box::new(NativeStream {
            agent: self,
            history: input.to_vec(),
            pending: VecDeque::new(),
            steps: 0,
            done: false,
        }))
    }
}

struct NativeStream<'a, M> {
    agent: &'a NativeAgent<M>,
    history: Vec<Message>,
    pending: VecDeque<ToolCall>,
    steps: u32,
    done: bool,
}

impl<M: ChatModel> NativeStream<'_, M> {
    fn run_tool(&mut self, call: ToolCall) -> Result<Chunk> {
        let output = self.agent.tools.call(&call)?;
        self.history.push(Message::human(format!(
            "Tool {} returned:\n{output}",
            call.name
        )));
        Ok(json!({ "type": "tool", "tool": call.name, "output": output }))
    }

    fn step(&mut self) -> Result<Chunk> {
        self.steps += 1;
        let messages = trim_history(&self.history, self.agent.max_tokens);
        let reply = self.agent.model.invoke(&messages)?;
        debug!(
            step = self.steps,
            tool_calls = reply.tool_calls.len(),
            "model replied"
        );

        self.history.push(Message::ai(reply.content.clone()));
        let requested: Vec<&str> = reply.tool_calls.iter().map(|c| c.name.as_str()).collect();
        let chunk = json!({
            "type": "ai",
            "content": reply.content,
            "tool_calls": requested,
        });
        if reply.tool_calls.is_empty() {
            self.done = true;
        }
        self.pending.extend(reply.tool_calls);
        Ok(chunk)
    }
}

impl<M: ChatModel> Iterator for NativeStream<'_, M> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(call) = self.pending.pop_front() {
            let result = self.run_tool(call);
            if result.is_err() {
                self.done = true;
                self.pending.clear();
            }
            return Some(result);
        }
        if self.done {
            return None;
        }
        if self.steps >= self.agent.max_steps {
            info!(max_steps = self.agent.max_steps, "step limit reached");
            self.done = true;
            return None;
        }
        let result = self.step();
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}
