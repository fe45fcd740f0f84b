//! Agent capability and its two implementations.
//!
//! An [`Agent`] turns a message history into a lazy, finite stream of output
//! chunks. [`create_agent`] picks the implementation for the configured model.

use anyhow::Result;
use tracing::info;

use crate::core::models::{DEFAULT_TOKEN_LIMIT, get_model_token_limit, is_anthropic_claude};
use crate::core::types::{AgentKind, AgentType, Chunk, Message};
use crate::io::config::RunConfig;
use crate::io::model::ChatModel;

pub mod delegated;
pub mod native;

pub use delegated::DelegatedAgent;
pub use native::{NativeAgent, Tool, ToolSet};

/// Chunks produced by one agent pass, in production order.
pub type ChunkStream<'a> = Box<dyn Iterator<Item = Result<Chunk>> + 'a>;

pub trait Agent {
    fn kind(&self) -> AgentKind;

    /// Start a pass over `input`. Errors either here or from the stream.
    fn stream(&self, input: &[Message], config: &RunConfig) -> Result<ChunkStream<'_>>;
}

impl<A: Agent + ?Sized> Agent for &A {
    fn kind(&self) -> AgentKind {
        (**self).kind()
    }

    fn stream(&self, input: &[Message], config: &RunConfig) -> Result<ChunkStream<'_>> {
        (**self).stream(input, config)
    }
}

/// Agent chosen by [`create_agent`].
#[derive(Debug)]
pub enum AgentBackend<M> {
    Delegated(DelegatedAgent),
    Native(NativeAgent<M>),
}

impl<M: ChatModel> Agent for AgentBackend<M> {
    fn kind(&self) -> AgentKind {
        match self {
            AgentBackend::Delegated(agent) => agent.kind(),
            AgentBackend::Native(agent) => agent.kind(),
        }
    }

    fn stream(&self, input: &[Message], config: &RunConfig) -> Result<ChunkStream<'_>> {
        match self {
            AgentBackend::Delegated(agent) => agent.stream(input, config),
            AgentBackend::Native(agent) => agent.stream(input, config),
        }
    }
}

/// Build the agent for `agent_type`.
///
/// Anthropic Claude models go to the delegated executor, which trims its
/// transcript to the model's limit only when `limit_tokens` is set. Every
/// other model runs on the native loop with `max_tokens` set to the model
/// limit (or [`DEFAULT_TOKEN_LIMIT`] when unknown).
pub fn create_agent<M: ChatModel>(
    model: M,
    tools: ToolSet,
    config: &RunConfig,
    agent_type: AgentType,
) -> AgentBackend<M> {
    let limit = get_model_token_limit(config, agent_type);
    if is_anthropic_claude(config) {
        let token_limit = config
            .limit_tokens
            .then(|| limit.unwrap_or(DEFAULT_TOKEN_LIMIT));
        info!(kind = "delegated", ?token_limit, "created agent");
        return AgentBackend::Delegated(DelegatedAgent::new(&config.executor, token_limit));
    }
    let max_tokens = limit.unwrap_or(DEFAULT_TOKEN_LIMIT);
    info!(kind = "native", max_tokens, "created agent");
    AgentBackend::Native(NativeAgent::new(
        model,
        tools,
        max_tokens,
        config.native.max_steps,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::model::ModelReply;

    struct NoModel;

    impl ChatModel for NoModel {
        fn invoke(&self, _messages: &[Message]) -> Result<ModelReply> {
            Ok(ModelReply::default())
        }
    }

    fn config(provider: &str, model: &str) -> RunConfig {
        RunConfig {
            provider: Some(provider.to_string()),
            model: Some(model.to_string()),
            ..RunConfig::default()
        }
    }

    #[test]
    fn claude_with_limit_tokens_is_delegated_and_trimmed() {
        let cfg = config("anthropic", "claude-2");
        let agent = create_agent(NoModel, ToolSet::new(), &cfg, AgentType::Default);
        assert_eq!(agent.kind(), AgentKind::Delegated);
        let AgentBackend::Delegated(delegated) = agent else {
            panic!("expected delegated agent");
        };
        assert_eq!(delegated.token_limit(), Some(100_000));
    }

    #[test]
    fn claude_without_limit_tokens_is_untrimmed() {
        let mut cfg = config("anthropic", "claude-2");
        cfg.limit_tokens = false;
        let AgentBackend::Delegated(delegated) =
            create_agent(NoModel, ToolSet::new(), &cfg, AgentType::Default)
        else {
            panic!("expected delegated agent");
        };
        assert_eq!(delegated.token_limit(), None);
    }

    #[test]
    fn other_models_are_native_with_model_limit() {
        let cfg = config("openai", "gpt-4");
        let AgentBackend::Native(native) =
            create_agent(NoModel, ToolSet::new(), &cfg, AgentType::Default)
        else {
            panic!("expected native agent");
        };
        assert_eq!(native.max_tokens(), 8_192);
        assert_eq!(native.kind(), AgentKind::Native);
    }

    #[test]
    fn unknown_model_uses_default_limit() {
        let cfg = config("local", "mystery");
        let AgentBackend::Native(native) =
            create_agent(NoModel, ToolSet::new(), &cfg, AgentType::Research)
        else {
            panic!("expected native agent");
        };
        assert_eq!(native.max_tokens(), DEFAULT_TOKEN_LIMIT);
    }
}
