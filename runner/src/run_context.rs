//! Shared run state for one top-level agent run and every run nested in it.
//!
//! A [`RunContext`] is created at top-level entry and handed (by clone) to
//! nested invocations and to tools that need to signal completion. All clones
//! share one state:
//!
//! - `depth` counts active scopes. [`RunContext::enter_scope`] returns a
//!   [`ScopeGuard`] whose `Drop` undoes the increment, so depth stays
//!   balanced on every exit path.
//! - The crash latch is context-wide: once set by any invocation, every
//!   invocation sharing the context observes it, and it never resets.
//! - The interrupted latch is context-wide too. It is set by whichever run
//!   consumed the interrupt and clears when the outermost scope is left.
//! - Completion flags belong to the innermost active scope.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use crate::core::types::Completion;

#[derive(Debug)]
struct RunState {
    depth: usize,
    crash_message: Option<String>,
    interrupted: bool,
    // frames[0] is the root frame; one more per active scope.
    frames: Vec<Completion>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            depth: 0,
            crash_message: None,
            interrupted: false,
            frames: vec![Completion::default()],
        }
    }
}

impl RunState {
    fn frame_mut(&mut self) -> &mut Completion {
        if self.frames.is_empty() {
            self.frames.push(Completion::default());
        }
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }
}

/// Cloneable handle to the shared run state.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    inner: Arc<Mutex<RunState>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        // A panic elsewhere must not wedge depth restoration.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enter a nested agent scope. Dropping the guard leaves it.
    pub fn enter_scope(&self) -> ScopeGuard {
        let mut state = self.lock();
        state.depth += 1;
        state.frames.push(Completion::default());
        let depth = state.depth;
        drop(state);
        debug!(depth, "entered run scope");
        ScopeGuard {
            ctx: self.clone(),
            depth,
        }
    }

    pub fn depth(&self) -> usize {
        self.lock().depth
    }

    pub fn is_crashed(&self) -> bool {
        self.lock().crash_message.is_some()
    }

    pub fn crash_message(&self) -> Option<String> {
        self.lock().crash_message.clone()
    }

    /// Latch the crash state. Returns `false` if it was already latched, in
    /// which case the stored message is left untouched.
    pub fn mark_crashed(&self, message: impl Into<String>) -> bool {
        let mut state = self.lock();
        if state.crash_message.is_some() {
            return false;
        }
        let message = message.into();
        error!(depth = state.depth, %message, "agent run crashed");
        state.crash_message = Some(message);
        true
    }

    /// Record that a run sharing this context was interrupted.
    pub fn mark_interrupted(&self) {
        let mut state = self.lock();
        if !state.interrupted {
            debug!(depth = state.depth, "run interrupted");
        }
        state.interrupted = true;
    }

    pub fn is_interrupted(&self) -> bool {
        self.lock().interrupted
    }

    pub fn mark_task_completed(&self, message: impl Into<String>) {
        let mut state = self.lock();
        let frame = state.frame_mut();
        frame.task_completed = true;
        frame.completion_message = message.into();
    }

    pub fn mark_plan_completed(&self, message: impl Into<String>) {
        let mut state = self.lock();
        let frame = state.frame_mut();
        frame.plan_completed = true;
        frame.completion_message = message.into();
    }

    /// Clear completion signals of the innermost scope.
    pub fn reset_completion(&self) {
        *self.lock().frame_mut() = Completion::default();
    }

    /// Snapshot of the innermost scope's completion signals.
    pub fn completion(&self) -> Completion {
        let state = self.lock();
        state.frames.last().cloned().unwrap_or_default()
    }
}

/// Active scope on a [`RunContext`]; leaving the scope is tied to `Drop`.
#[must_use = "dropping the guard immediately leaves the scope"]
#[derive(Debug)]
pub struct ScopeGuard {
    ctx: RunContext,
    depth: usize,
}

impl ScopeGuard {
    /// Depth of this scope (1 for the outermost).
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let mut state = self.ctx.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.frames.len() > 1 {
            state.frames.pop();
        }
        if state.depth == 0 {
            state.interrupted = false;
        }
        debug!(depth = state.depth, "left run scope");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, bail};
    use std::panic::{AssertUnwindSafe, catch_unwind};

    fn nested_work(ctx: &RunContext, remaining: usize, fail_at: usize) -> Result<()> {
        let _scope = ctx.enter_scope();
        if remaining == fail_at {
            bail!("work failed at depth {}", ctx.depth());
        }
        if remaining == 0 {
            return Ok(());
        }
        nested_work(ctx, remaining - 1, fail_at)
    }

    #[test]
    fn scope_increments_and_restores_depth() {
        let ctx = RunContext::new();
        {
            let outer = ctx.enter_scope();
            assert_eq!(outer.depth(), 1);
            {
                let inner = ctx.enter_scope();
                assert_eq!(inner.depth(), 2);
                assert_eq!(ctx.depth(), 2);
            }
            assert_eq!(ctx.depth(), 1);
        }
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn depth_balanced_when_work_fails() {
        let ctx = RunContext::new();
        let err = nested_work(&ctx, 4, 1).unwrap_err();
        assert!(err.to_string().contains("work failed at depth 4"));
        assert_eq!(ctx.depth(), 0);
        nested_work(&ctx, 3, usize::MAX).expect("no failure");
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn depth_balanced_when_work_panics() {
        let ctx = RunContext::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _scope = ctx.enter_scope();
            let _nested = ctx.enter_scope();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn crash_latch_keeps_first_message() {
        let ctx = RunContext::new();
        assert!(!ctx.is_crashed());
        assert!(ctx.mark_crashed("first"));
        assert!(!ctx.mark_crashed("second"));
        assert!(ctx.is_crashed());
        assert_eq!(ctx.crash_message().as_deref(), Some("first"));
    }

    #[test]
    fn crash_in_nested_scope_is_visible_to_parent() {
        let ctx = RunContext::new();
        let _outer = ctx.enter_scope();
        {
            let child = ctx.clone();
            let _inner = child.enter_scope();
            child.mark_crashed("child failed");
        }
        assert!(ctx.is_crashed());
        assert_eq!(ctx.crash_message().as_deref(), Some("child failed"));
    }

    #[test]
    fn interrupt_in_nested_scope_holds_until_outermost_exit() {
        let ctx = RunContext::new();
        {
            let _outer = ctx.enter_scope();
            {
                let _inner = ctx.enter_scope();
                ctx.mark_interrupted();
            }
            assert!(ctx.is_interrupted());
        }
        assert!(!ctx.is_interrupted());
    }

    #[test]
    fn completion_is_scoped_to_innermost_frame() {
        let ctx = RunContext::new();
        let _outer = ctx.enter_scope();
        ctx.mark_plan_completed("plan ready");
        {
            let _inner = ctx.enter_scope();
            assert_eq!(ctx.completion(), Completion::default());
            ctx.mark_task_completed("inner done");
            assert!(ctx.completion().task_completed);
        }
        let completion = ctx.completion();
        assert!(completion.plan_completed);
        assert!(!completion.task_completed);
        assert_eq!(completion.completion_message, "plan ready");
    }

    #[test]
    fn reset_clears_completion() {
        let ctx = RunContext::new();
        let _scope = ctx.enter_scope();
        ctx.mark_task_completed("done");
        ctx.mark_plan_completed("planned");
        ctx.reset_completion();
        assert_eq!(ctx.completion(), Completion::default());
    }
}
