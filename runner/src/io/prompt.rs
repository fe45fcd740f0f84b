//! Prompt text handed to child processes.
//!
//! Templates live next to this module and are compiled in with `include_str!`.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::Message;

const TRANSCRIPT_TEMPLATE: &str = include_str!("prompts/transcript.md");
const TEST_RETRY_TEMPLATE: &str = include_str!("prompts/test_retry.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("transcript", TRANSCRIPT_TEMPLATE)
            .context("load transcript template")?;
        env.add_template("test_retry", TEST_RETRY_TEMPLATE)
            .context("load test retry template")?;
        Ok(Self { env })
    }

    /// Role-tagged transcript, one block per message, in order.
    pub fn render_transcript(&self, messages: &[Message]) -> Result<String> {
        let template = self.env.get_template("transcript")?;
        let rendered = template.render(context! { messages => messages })?;
        Ok(rendered)
    }

    /// Original prompt extended with the failing test command's output.
    pub fn render_test_retry(&self, prompt: &str, output: &str) -> Result<String> {
        let template = self.env.get_template("test_retry")?;
        let rendered = template.render(context! {
            prompt => prompt,
            output => output,
        })?;
        Ok(rendered.trim_end().to_string())
    }
}

/// Render a transcript with a one-off engine.
pub fn render_transcript(messages: &[Message]) -> Result<String> {
    PromptEngine::new()?.render_transcript(messages)
}

/// Render the test-failure retry prompt with a one-off engine.
pub fn render_test_retry(prompt: &str, output: &str) -> Result<String> {
    PromptEngine::new()?.render_test_retry(prompt, output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_tags_each_role_in_order() {
        let messages = vec![
            Message::system("be brief"),
            Message::human("fix the build\n"),
            Message::ai("done"),
        ];
        let text = render_transcript(&messages).expect("render");
        let system = text.find("<system>\nbe brief\n</system>").expect("system");
        let human = text.find("<human>\nfix the build\n</human>").expect("human");
        let ai = text.find("<ai>\ndone\n</ai>").expect("ai");
        assert!(system < human && human < ai);
    }

    #[test]
    fn empty_transcript_renders_empty() {
        let text = render_transcript(&[]).expect("render");
        assert!(text.trim().is_empty());
    }

    #[test]
    fn test_retry_wraps_output() {
        let text = render_test_retry("add a parser", "1 failed").expect("render");
        assert_eq!(
            text,
            "add a parser. Previous attempt failed with: <test_cmd_outputs>1 failed</test_cmd_outputs>"
        );
    }

    #[test]
    fn test_retry_does_not_escape_output() {
        let text = render_test_retry("p", "a < b && c").expect("render");
        assert!(text.contains("a < b && c"));
    }
}
