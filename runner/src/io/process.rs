//! Child processes with timeouts and bounded output.
//!
//! Two shapes are offered: [`run_command_with_timeout`] collects everything
//! once the child exits, while [`spawn_streaming`] hands stdout back one line
//! at a time so the caller can render and checkpoint between lines.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Whether the child exited zero within its deadline.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// stdout followed by stderr, lossily decoded, with truncation notices.
    pub fn combined_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if self.stdout_truncated > 0 {
            text.push_str(&format!(
                "\n[stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        text.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.stderr_truncated > 0 {
            text.push_str(&format!(
                "\n[stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        text
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    let mut child = spawn_piped(&mut cmd, stdin.is_some())?;

    let stdin_handle = feed_stdin(&mut child, stdin.map(<[u8]>::to_vec))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let (status, timed_out) = wait_or_kill(&mut child, timeout)?;

    if let Some(handle) = stdin_handle {
        join_stdin(handle);
    }
    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Exit information for a streamed child, available after stdout is drained.
#[derive(Debug)]
pub struct StreamExit {
    pub status: ExitStatus,
    pub stderr: Vec<u8>,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl StreamExit {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Lines buffered between the stdout reader thread and the consumer.
const LINE_BUFFER: usize = 64;

/// A running child whose stdout is consumed line by line.
///
/// The whole run, reads included, is bounded by the deadline set at spawn.
/// Dropping it before [`finish`](Self::finish) kills the child.
#[derive(Debug)]
pub struct StreamingChild {
    child: Child,
    lines: Receiver<Result<String>>,
    deadline: Instant,
    stdin_handle: Option<thread::JoinHandle<()>>,
    stderr_handle: Option<thread::JoinHandle<Result<(Vec<u8>, usize)>>>,
    timed_out: bool,
    finished: bool,
}

/// Spawn `cmd`, optionally feeding `stdin`, with stdout exposed as a line stream.
///
/// `timeout` bounds the child from spawn to exit. `output_limit_bytes` bounds
/// each stdout line and the captured stderr.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn spawn_streaming(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<StreamingChild> {
    let mut child = spawn_piped(&mut cmd, stdin.is_some())?;
    let deadline = Instant::now() + timeout;

    let stdin_handle = feed_stdin(&mut child, stdin)?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let (tx, lines) = mpsc::sync_channel(LINE_BUFFER);
    thread::spawn(move || forward_lines(BufReader::new(stdout), output_limit_bytes, tx));

    Ok(StreamingChild {
        child,
        lines,
        deadline,
        stdin_handle,
        stderr_handle: Some(stderr_handle),
        timed_out: false,
        finished: false,
    })
}

impl StreamingChild {
    /// Next stdout line without its terminator.
    ///
    /// `None` means end of stream, or that the deadline passed and the child
    /// was killed; [`finish`](Self::finish) tells the two apart.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        if self.timed_out {
            return Ok(None);
        }
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        match self.lines.recv_timeout(remaining) {
            Ok(line) => line.map(Some),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
            Err(RecvTimeoutError::Timeout) => {
                warn!("command timed out while streaming, killing");
                self.timed_out = true;
                self.child.kill().context("kill command")?;
                Ok(None)
            }
        }
    }

    /// Wait for exit within what is left of the deadline, then collect stderr.
    pub fn finish(mut self) -> Result<StreamExit> {
        let (status, timed_out) = if self.timed_out {
            (self.child.wait().context("wait command after kill")?, true)
        } else {
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            wait_or_kill(&mut self.child, remaining)?
        };
        self.finished = true;

        if let Some(handle) = self.stdin_handle.take() {
            join_stdin(handle);
        }
        // A killed child may leave stderr open in a grandchild; skip the join then.
        let (stderr, stderr_truncated) = match self.stderr_handle.take() {
            Some(handle) if !timed_out => join_output(handle).context("join stderr")?,
            _ => (Vec::new(), 0),
        };

        debug!(exit_code = ?status.code(), timed_out, "streamed command finished");
        Ok(StreamExit {
            status,
            stderr,
            stderr_truncated,
            timed_out,
        })
    }
}

impl Drop for StreamingChild {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.child.kill() {
            debug!(err = %err, "kill on drop failed");
        }
        if let Err(err) = self.child.wait() {
            debug!(err = %err, "wait on drop failed");
        }
    }
}

fn forward_lines<R: BufRead>(mut reader: R, limit: usize, tx: SyncSender<Result<String>>) {
    loop {
        let mut line = Vec::new();
        let item = match reader.read_until(b'\n', &mut line) {
            Ok(0) => return,
            Ok(_) => Ok(clip_line(line, limit)),
            Err(err) => Err(anyhow::Error::new(err).context("read stdout line")),
        };
        let failed = item.is_err();
        // The consumer hung up; nothing left to deliver to.
        if tx.send(item).is_err() || failed {
            return;
        }
    }
}

fn clip_line(mut line: Vec<u8>, limit: usize) -> String {
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    if line.len() > limit {
        warn!(len = line.len(), limit, "stdout line truncated");
        line.truncate(limit);
    }
    String::from_utf8_lossy(&line).into_owned()
}

fn spawn_piped(cmd: &mut Command, with_stdin: bool) -> Result<Child> {
    if with_stdin {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    match cmd.spawn() {
        Ok(c) => Ok(c),
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            Err(e).context("spawn command")
        }
    }
}

fn feed_stdin(
    child: &mut Child,
    input: Option<Vec<u8>>,
) -> Result<Option<thread::JoinHandle<()>>> {
    let Some(input) = input else {
        return Ok(None);
    };
    let mut child_stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;
    // A writer thread keeps a large prompt from deadlocking against a full stdout pipe.
    Ok(Some(thread::spawn(move || {
        if let Err(err) = child_stdin.write_all(&input) {
            debug!(err = %err, "child closed stdin early");
        }
    })))
}

fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => Ok((status, false)),
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            child.kill().context("kill command")?;
            let status = child.wait().context("wait command after kill")?;
            Ok((status, true))
        }
    }
}

fn join_stdin(handle: thread::JoinHandle<()>) {
    if handle.join().is_err() {
        warn!("stdin writer thread panicked");
    }
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
