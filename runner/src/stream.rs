//! One agent pass: forward every chunk to the renderer, checking for
//! interrupts between chunks.

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::agents::Agent;
use crate::core::types::Message;
use crate::io::config::RunConfig;
use crate::io::interrupt::InterruptController;
use crate::io::render::OutputRenderer;
use crate::run_context::RunContext;

/// Run `agent` over `input` to the end of its stream.
///
/// Resets the innermost completion frame first. The first stream error is
/// returned as-is; an interrupt observed after a chunk returns
/// [`crate::error::Interrupted`].
#[instrument(skip_all, fields(kind = %agent.kind(), messages = input.len()))]
pub fn run_agent_stream<A: Agent + ?Sized>(
    agent: &A,
    input: &[Message],
    config: &RunConfig,
    ctx: &RunContext,
    renderer: &dyn OutputRenderer,
    interrupts: &InterruptController,
) -> Result<()> {
    ctx.reset_completion();
    let kind = agent.kind();
    let stream = agent.stream(input, config)?;
    let mut chunks = 0usize;
    for chunk in stream {
        let chunk = chunk?;
        renderer.render(&chunk, kind);
        chunks += 1;
        interrupts
            .checkpoint()
            .with_context(|| format!("interrupted after {chunks} chunks"))?;
    }
    debug!(chunks, "agent stream finished");
    Ok(())
}
