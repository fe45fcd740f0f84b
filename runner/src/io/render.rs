//! Console presentation of agent output chunks.

use std::io::Write;

use serde_json::Value;
use tracing::warn;

use crate::core::types::{AgentKind, Chunk};

/// Receives every chunk an agent produces, in production order.
pub trait OutputRenderer {
    fn render(&self, chunk: &Chunk, kind: AgentKind);
}

/// Prints chunks to stdout, one line per chunk, tagged with the agent kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleRenderer;

impl OutputRenderer for ConsoleRenderer {
    fn render(&self, chunk: &Chunk, kind: AgentKind) {
        let text = chunk_text(chunk);
        if text.is_empty() {
            return;
        }
        let mut stdout = std::io::stdout().lock();
        if let Err(err) = writeln!(stdout, "[{kind}] {text}") {
            warn!(err = %err, "failed to write chunk to stdout");
        }
    }
}

/// Human-readable text of a chunk.
///
/// Strings print as-is; objects print their `text`, `content` or `message`
/// field when present, and compact JSON otherwise.
pub fn chunk_text(chunk: &Chunk) -> String {
    match chunk {
        Value::Null => String::new(),
        Value::String(s) => s.trim_end().to_string(),
        Value::Object(map) => ["text", "content", "message"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(|s| s.trim_end().to_string())
            .unwrap_or_else(|| chunk.to_string()),
        other => other.to_string(),
    }
}
