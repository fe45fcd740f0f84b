//! Scripted collaborators for unit and integration tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::agents::{Agent, ChunkStream};
use crate::core::types::{AgentKind, Chunk, Message};
use crate::io::config::RunConfig;
use crate::io::model::{ChatModel, ModelReply};
use crate::io::render::OutputRenderer;
use crate::io::test_cmd::{TestRequest, TestResult, TestRunner};
use crate::retry::RetryPolicy;

#[cfg(unix)]
pub use crate::io::interrupt::testing::{
    current_handler, raise_sigint, recording_handler, signal_lock,
};

/// One scripted agent pass: these chunks, then optionally an error.
pub struct ScriptedRun {
    pub chunks: Vec<Chunk>,
    pub error: Option<anyhow::Error>,
}

impl ScriptedRun {
    pub fn chunks(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks,
            error: None,
        }
    }

    pub fn failing(chunks: Vec<Chunk>, error: anyhow::Error) -> Self {
        Self {
            chunks,
            error: Some(error),
        }
    }
}

type StreamHook = Box<dyn Fn(usize)>;

/// Agent that replays queued runs, one per `stream` call.
pub struct ScriptedAgent {
    kind: AgentKind,
    runs: RefCell<VecDeque<ScriptedRun>>,
    inputs: RefCell<Vec<Vec<Message>>>,
    hook: Option<StreamHook>,
}

impl ScriptedAgent {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            kind: AgentKind::Delegated,
            runs: RefCell::new(runs.into()),
            inputs: RefCell::new(Vec::new()),
            hook: None,
        }
    }

    pub fn with_kind(mut self, kind: AgentKind) -> Self {
        self.kind = kind;
        self
    }

    /// Call `hook` with the 1-based call number whenever a pass starts.
    pub fn on_stream(mut self, hook: impl Fn(usize) + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> usize {
        self.inputs.borrow().len()
    }

    /// Input of every pass so far.
    pub fn inputs(&self) -> Vec<Vec<Message>> {
        self.inputs.borrow().clone()
    }
}

impl Agent for ScriptedAgent {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    fn stream(&self, input: &[Message], _config: &RunConfig) -> Result<ChunkStream<'_>> {
        self.inputs.borrow_mut().push(input.to_vec());
        let call = self.calls();
        if let Some(hook) = &self.hook {
            hook(call);
        }
        let run = self
            .runs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted agent has no run for call {call}"))?;
        let items = run
            .chunks
            .into_iter()
            .map(Ok)
            .chain(run.error.map(Err));
        Ok(Box::new(items))
    }
}

type RenderHook = Box<dyn Fn(&Chunk)>;

/// Renderer that records every chunk it receives.
#[derive(Default)]
pub struct RecordingRenderer {
    rendered: RefCell<Vec<(Chunk, AgentKind)>>,
    hook: Option<RenderHook>,
}

impl RecordingRenderer {
    /// Also call `hook` after recording each chunk.
    pub fn with_hook(hook: impl Fn(&Chunk) + 'static) -> Self {
        Self {
            rendered: RefCell::new(Vec::new()),
            hook: Some(Box::new(hook)),
        }
    }

    pub fn rendered(&self) -> Vec<(Chunk, AgentKind)> {
        self.rendered.borrow().clone()
    }
}

impl OutputRenderer for RecordingRenderer {
    fn render(&self, chunk: &Chunk, kind: AgentKind) {
        self.rendered.borrow_mut().push((chunk.clone(), kind));
        if let Some(hook) = &self.hook {
            hook(chunk);
        }
    }
}

/// Chat model that replays queued replies and records what it was sent.
#[derive(Default)]
pub struct ScriptedModel {
    replies: RefCell<VecDeque<Result<ModelReply>>>,
    seen: RefCell<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<ModelReply>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            seen: RefCell::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.borrow().clone()
    }
}

impl ChatModel for ScriptedModel {
    fn invoke(&self, messages: &[Message]) -> Result<ModelReply> {
        self.seen.borrow_mut().push(messages.to_vec());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted model has no reply left")))
    }
}

/// Test runner that replays queued results; passes once the queue is empty.
#[derive(Default)]
pub struct ScriptedTestRunner {
    results: RefCell<VecDeque<TestResult>>,
    calls: Cell<usize>,
}

impl ScriptedTestRunner {
    pub fn new(results: Vec<TestResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, _request: &TestRequest) -> Result<TestResult> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.results.borrow_mut().pop_front().unwrap_or(TestResult {
            success: true,
            output: String::new(),
        }))
    }
}

/// Three attempts with millisecond backoff.
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        poll_interval: Duration::from_millis(1),
    }
}
