//! Command runner: spawn a child process, enforce an optional timeout, and
//! capture bounded stdout/stderr.
//!
//! Every child leads its own process group. Timeouts and cleanup signal the
//! whole group, so grandchildren (`ssh` under `git fetch`, compilers under
//! `make`) cannot outlive the command or keep its pipes open.

use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Bytes of stdout/stderr kept in memory per stream.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// A command to execute: program, arguments, working directory, timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    /// `None` waits for the child without bound.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: workdir.into(),
            timeout: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program and arguments joined for log and error messages.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// How a command invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The child exited on its own. `None` means it was terminated by a signal.
    Exited(Option<i32>),
    /// The timeout elapsed and the child's process group was killed and
    /// the child reaped.
    TimedOut,
    /// The child could not be started.
    SpawnFailed(String),
    /// The timeout elapsed but killing the child failed.
    KillFailed(String),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Exited(Some(0)))
    }
}

/// Result of a single command invocation.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub outcome: RunOutcome,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
    pub pid: Option<u32>,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    fn not_started(reason: String, elapsed: Duration) -> Self {
        Self {
            outcome: RunOutcome::SpawnFailed(reason),
            stdout: Vec::new(),
            stderr: Vec::new(),
            elapsed,
            pid: None,
        }
    }
}

/// Abstraction over command execution.
///
/// The git probe and the rebuild pipeline only talk to processes through this
/// trait; tests substitute scripted runners.
pub trait CommandRunner {
    /// Run the command to completion (or timeout).
    ///
    /// Spawn, timeout and kill failures are reported through
    /// [`RunResult::outcome`]. `Err` is reserved for failures of the runner
    /// itself (waiting on the child, collecting output).
    fn run(&self, spec: &CommandSpec) -> Result<RunResult>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, spec: &CommandSpec) -> Result<RunResult> {
        (**self).run(spec)
    }
}

/// Runner that spawns real child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    output_limit_bytes: usize,
}

impl ProcessRunner {
    pub fn new(output_limit_bytes: usize) -> Self {
        Self { output_limit_bytes }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_LIMIT_BYTES)
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, spec: &CommandSpec) -> Result<RunResult> {
        run_command_with_timeout(spec, self.output_limit_bytes)
    }
}

/// Kills the child's process group and reaps the child unless it was
/// already reaped.
///
/// Held for the whole lifetime of the child so that early returns and panics
/// never leave an orphan or zombie behind.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    /// SIGKILL every process in the child's group.
    fn kill_group(&self) -> nix::Result<()> {
        killpg(group_of(self.child.id()), Signal::SIGKILL)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if self.kill_group().is_ok() || self.child.kill().is_ok() {
            let _ = self.child.wait();
        }
    }
}

/// The child is spawned with `process_group(0)`, so its pid is its pgid.
fn group_of(pid: u32) -> Pid {
    Pid::from_raw(pid as i32)
}

/// Kill processes left in the group after its leader exited.
///
/// An empty group (`ESRCH`) is the normal case. The pgid cannot be reused
/// while any member is alive, so this never reaches an unrelated group.
fn sweep_group(pid: u32) -> nix::Result<()> {
    match killpg(group_of(pid), Signal::SIGKILL) {
        Ok(()) => {
            debug!(pid, "killed processes left behind by command");
            Ok(())
        }
        Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Run a command with an optional timeout and capture stdout/stderr without
/// risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes`
/// bounds the amount of stdout/stderr stored in memory (bytes beyond this are
/// discarded while still draining the pipe).
#[instrument(skip_all, fields(command = %spec.display(), timeout_secs = spec.timeout.map(|t| t.as_secs())))]
pub fn run_command_with_timeout(spec: &CommandSpec, output_limit_bytes: usize) -> Result<RunResult> {
    let start = Instant::now();
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    debug!("spawning child process");
    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Ok(RunResult::not_started(e.to_string(), start.elapsed()));
        }
    };
    let pid = child.id();
    let mut guard = ChildGuard::new(child);

    let stdout = guard
        .child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = guard
        .child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle =
        thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle =
        thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let outcome = match spec.timeout {
        None => {
            let status = guard.child.wait().context("wait for command")?;
            guard.reaped = true;
            RunOutcome::Exited(status.code())
        }
        Some(timeout) => match guard
            .child
            .wait_timeout(timeout)
            .context("wait for command")?
        {
            Some(status) => {
                guard.reaped = true;
                RunOutcome::Exited(status.code())
            }
            None => {
                warn!(
                    timeout_secs = timeout.as_secs_f64(),
                    pid, "command timed out, killing process group"
                );
                match guard.kill_group() {
                    Ok(()) => {
                        guard.child.wait().context("wait command after kill")?;
                        guard.reaped = true;
                        RunOutcome::TimedOut
                    }
                    Err(e) => {
                        error!(err = %e, pid, "failed to kill timed-out command");
                        RunOutcome::KillFailed(e.to_string())
                    }
                }
            }
        },
    };

    // Background processes of an exited command would hold the pipes open
    // and block the readers below.
    if guard.reaped
        && let Err(e) = sweep_group(pid)
    {
        warn!(err = %e, pid, "failed to kill leftover processes");
    }

    // A child that survived a failed kill still holds the pipes open; joining
    // the readers would block on it.
    let (stdout, stderr) = if matches!(outcome, RunOutcome::KillFailed(_)) {
        (Vec::new(), Vec::new())
    } else {
        let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
        let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;
        if stdout_truncated > 0 || stderr_truncated > 0 {
            warn!(stdout_truncated, stderr_truncated, "output truncated");
        }
        (stdout, stderr)
    };

    let elapsed = start.elapsed();
    debug!(?outcome, elapsed_ms = elapsed.as_millis() as u64, "command finished");
    Ok(RunResult {
        outcome,
        stdout,
        stderr,
        elapsed,
        pid: Some(pid),
    })
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
