//! Provider detection and model context-window limits.

use tracing::debug;

use crate::core::types::AgentType;
use crate::io::config::RunConfig;

/// Budget used when a model's limit is unknown.
pub const DEFAULT_TOKEN_LIMIT: usize = 100_000;

/// Built-in context windows, keyed by (provider, model).
const KNOWN_LIMITS: &[(&str, &str, usize)] = &[
    ("anthropic", "claude2", 100_000),
    ("anthropic", "claude-2", 100_000),
    ("anthropic", "claude-2.1", 200_000),
    ("anthropic", "claude-3-haiku-20240307", 200_000),
    ("anthropic", "claude-3-opus-20240229", 200_000),
    ("anthropic", "claude-3-5-haiku-20241022", 200_000),
    ("anthropic", "claude-3-5-sonnet-20240620", 200_000),
    ("anthropic", "claude-3-5-sonnet-20241022", 200_000),
    ("anthropic", "claude-3-7-sonnet-20250219", 200_000),
    ("openai", "gpt-4", 8_192),
    ("openai", "gpt-4-32k", 32_768),
    ("openai", "gpt-4-turbo", 128_000),
    ("openai", "gpt-4o", 128_000),
    ("openai", "gpt-4o-mini", 128_000),
    ("openai", "o1", 200_000),
    ("openai", "o3-mini", 200_000),
    ("deepseek", "deepseek-chat", 64_000),
    ("deepseek", "deepseek-reasoner", 64_000),
    ("openrouter", "anthropic/claude-3.5-sonnet", 200_000),
    ("openrouter", "deepseek/deepseek-r1", 64_000),
];

/// Whether the configured main model is an Anthropic Claude model, either
/// directly or routed through OpenRouter.
pub fn is_anthropic_claude(config: &RunConfig) -> bool {
    let (Some(provider), Some(model)) = (config.provider.as_deref(), config.model.as_deref())
    else {
        return false;
    };
    let provider = provider.to_ascii_lowercase();
    let model = model.to_ascii_lowercase();
    (provider == "anthropic" && model.contains("claude"))
        || (provider == "openrouter" && model.starts_with("anthropic/claude"))
}

/// Context window for the model an agent stage runs on.
///
/// `[models]` overrides win over the built-in table. Returns `None` when no
/// model is configured or the model is unknown.
pub fn get_model_token_limit(config: &RunConfig, agent_type: AgentType) -> Option<usize> {
    let (provider, model) = config.model_for(agent_type)?;
    let limit = config
        .configured_token_limit(provider, model)
        .or_else(|| builtin_token_limit(provider, model));
    debug!(provider, model, ?agent_type, ?limit, "resolved model token limit");
    limit
}

/// Lookup in the built-in table; an exact name wins, then the name with
/// dashes removed (so `claude-2` and `claude2` resolve alike).
pub fn builtin_token_limit(provider: &str, model: &str) -> Option<usize> {
    let provider = provider.to_ascii_lowercase();
    let model = model.to_ascii_lowercase();
    let exact = KNOWN_LIMITS
        .iter()
        .find(|(p, m, _)| *p == provider && *m == model);
    if let Some((_, _, limit)) = exact {
        return Some(*limit);
    }
    let normalized = model.replace('-', "");
    KNOWN_LIMITS
        .iter()
        .find(|(p, m, _)| *p == provider && m.replace('-', "") == normalized)
        .map(|(_, _, limit)| *limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::ModelParams;

    fn config(provider: &str, model: &str) -> RunConfig {
        RunConfig {
            provider: Some(provider.to_string()),
            model: Some(model.to_string()),
            ..RunConfig::default()
        }
    }

    #[test]
    fn known_models_resolve() {
        assert_eq!(
            get_model_token_limit(&config("anthropic", "claude2"), AgentType::Default),
            Some(100_000)
        );
        assert_eq!(
            get_model_token_limit(&config("anthropic", "claude-2"), AgentType::Default),
            Some(100_000)
        );
        assert_eq!(
            get_model_token_limit(&config("openai", "gpt-4"), AgentType::Default),
            Some(8_192)
        );
    }

    #[test]
    fn unknown_or_missing_is_none() {
        assert_eq!(
            get_model_token_limit(&config("unknown", "unknown-model"), AgentType::Default),
            None
        );
        assert_eq!(
            get_model_token_limit(&RunConfig::default(), AgentType::Default),
            None
        );
    }

    #[test]
    fn stage_keys_fall_back_to_main_pair() {
        let mut cfg = config("openai", "gpt-4");
        cfg.research_model = Some("gpt-4o".to_string());
        assert_eq!(
            get_model_token_limit(&cfg, AgentType::Research),
            Some(128_000)
        );
        assert_eq!(get_model_token_limit(&cfg, AgentType::Planner), Some(8_192));

        cfg.planner_provider = Some("anthropic".to_string());
        cfg.planner_model = Some("claude-3-5-sonnet-20241022".to_string());
        assert_eq!(
            get_model_token_limit(&cfg, AgentType::Planner),
            Some(200_000)
        );
    }

    #[test]
    fn configured_override_wins() {
        let mut cfg = config("openai", "gpt-4");
        cfg.models
            .entry("openai".to_string())
            .or_default()
            .insert("gpt-4".to_string(), ModelParams { token_limit: 4_000 });
        assert_eq!(get_model_token_limit(&cfg, AgentType::Default), Some(4_000));
    }

    #[test]
    fn detects_claude() {
        assert!(is_anthropic_claude(&config("anthropic", "claude-3-opus-20240229")));
        assert!(is_anthropic_claude(&config(
            "openrouter",
            "anthropic/claude-3.5-sonnet"
        )));
        assert!(is_anthropic_claude(&config("Anthropic", "Claude-2")));
        assert!(!is_anthropic_claude(&config("openai", "gpt-4")));
        assert!(!is_anthropic_claude(&config("openrouter", "openai/gpt-4o")));
        assert!(!is_anthropic_claude(&RunConfig::default()));
    }
}
