//! Shared deterministic types for the execution core.
//!
//! These types define stable contracts between the orchestrator, the agents
//! and the pure helpers in [`crate::core`]. They carry no I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Author of a message in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Ai,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Human => "human",
            Role::Ai => "ai",
        }
    }
}

/// A single role-tagged entry of the message history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(Role::Ai, content)
    }
}

/// One unit of incremental agent output, forwarded verbatim to the renderer.
pub type Chunk = serde_json::Value;

/// Implementation variant behind the [`crate::agents::Agent`] capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Wraps an external executor process.
    Delegated,
    /// Built-in minimal model/tool loop.
    Native,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Delegated => "delegated",
            AgentKind::Native => "native",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage an agent runs for. Selects which provider/model pair applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentType {
    #[default]
    Default,
    Research,
    Planner,
}

/// Completion signals raised by the agent's own signaling tools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub plan_completed: bool,
    pub task_completed: bool,
    pub completion_message: String,
}

impl Completion {
    pub fn is_signaled(&self) -> bool {
        self.plan_completed || self.task_completed
    }
}
