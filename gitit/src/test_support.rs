//! Test-only helpers: scripted command runner, scripted git probe, and a real
//! git repository with an upstream in a temp dir.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::io::git::{GitError, GitProbe};
use crate::io::process::{CommandRunner, CommandSpec, RunOutcome, RunResult};

/// Build a [`RunResult`] with the given outcome and no output.
pub fn outcome_result(outcome: RunOutcome) -> RunResult {
    RunResult {
        outcome,
        stdout: Vec::new(),
        stderr: Vec::new(),
        elapsed: Duration::from_millis(1),
        pid: Some(4242),
    }
}

/// Successful run printing `stdout`.
pub fn ok_result(stdout: &str) -> RunResult {
    RunResult {
        stdout: stdout.as_bytes().to_vec(),
        ..outcome_result(RunOutcome::Exited(Some(0)))
    }
}

/// Run that exited with `code`.
pub fn exit_result(code: i32) -> RunResult {
    RunResult {
        stderr: format!("exit {code}").into_bytes(),
        ..outcome_result(RunOutcome::Exited(Some(code)))
    }
}

/// [`CommandRunner`] that returns queued results and records every spec.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    results: RefCell<VecDeque<RunResult>>,
    calls: RefCell<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new(results: Vec<RunResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<RunResult> {
        self.calls.borrow_mut().push(spec.clone());
        self.results
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted runner exhausted at `{}`", spec.display()))
    }
}

/// Calls recorded by [`ScriptedProbe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeCall {
    CurrentBranch,
    LocalHead,
    RemoteHead,
    Pull,
    HardReset,
}

/// In-memory [`GitProbe`].
///
/// `pull` moves the local head to the remote head, like a fast-forward.
/// Failures are queued per call with [`ScriptedProbe::fail_next`].
#[derive(Debug)]
pub struct ScriptedProbe {
    branch: String,
    local: RefCell<String>,
    remote: RefCell<String>,
    failures: RefCell<Vec<(ProbeCall, u32)>>,
    calls: RefCell<Vec<ProbeCall>>,
}

impl ScriptedProbe {
    pub fn new(local: &str, remote: &str) -> Self {
        Self {
            branch: "main".to_string(),
            local: RefCell::new(local.to_string()),
            remote: RefCell::new(remote.to_string()),
            failures: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Simulate a new upstream commit.
    pub fn push_remote(&self, head: &str) {
        *self.remote.borrow_mut() = head.to_string();
    }

    /// Make the next `times` invocations of `call` fail.
    pub fn fail_next(&self, call: ProbeCall, times: u32) {
        self.failures.borrow_mut().push((call, times));
    }

    pub fn calls(&self) -> Vec<ProbeCall> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, call: ProbeCall) -> usize {
        self.calls.borrow().iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: ProbeCall) -> Result<(), GitError> {
        self.calls.borrow_mut().push(call);
        let mut failures = self.failures.borrow_mut();
        if let Some(entry) = failures.iter_mut().find(|(c, n)| *c == call && *n > 0) {
            entry.1 -= 1;
            return Err(GitError::Failed {
                command: format!("{call:?}"),
                code: Some(1),
                stderr: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

impl GitProbe for ScriptedProbe {
    fn current_branch(&self) -> Result<String, GitError> {
        self.record(ProbeCall::CurrentBranch)?;
        Ok(self.branch.clone())
    }

    fn local_head(&self) -> Result<String, GitError> {
        self.record(ProbeCall::LocalHead)?;
        Ok(self.local.borrow().clone())
    }

    fn remote_head(&self, _branch: &str) -> Result<String, GitError> {
        self.record(ProbeCall::RemoteHead)?;
        Ok(self.remote.borrow().clone())
    }

    fn pull(&self) -> Result<(), GitError> {
        self.record(ProbeCall::Pull)?;
        let remote = self.remote.borrow().clone();
        *self.local.borrow_mut() = remote;
        Ok(())
    }

    fn hard_reset(&self) -> Result<(), GitError> {
        self.record(ProbeCall::HardReset)
    }
}

/// A working clone (`work/`) of a bare repository (`origin.git/`), plus a
/// second clone (`upstream/`) used to push new commits to the origin.
pub struct TestRepo {
    _temp: TempDir,
    work: PathBuf,
    upstream: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        let root = temp.path();
        let origin = root.join("origin.git");
        let upstream = root.join("upstream");
        let work = root.join("work");

        fs::create_dir_all(&origin).context("create origin dir")?;
        run_git(&origin, &["init", "-q", "--bare"])?;
        run_git(&origin, &["symbolic-ref", "HEAD", "refs/heads/main"])?;

        fs::create_dir_all(&upstream).context("create upstream dir")?;
        run_git(&upstream, &["init", "-q"])?;
        run_git(&upstream, &["symbolic-ref", "HEAD", "refs/heads/main"])?;
        configure_identity(&upstream)?;
        fs::write(upstream.join("README.md"), "seed\n").context("write README")?;
        run_git(&upstream, &["add", "-A"])?;
        run_git(&upstream, &["commit", "-q", "-m", "seed"])?;
        let origin_str = origin.to_string_lossy().to_string();
        run_git(&upstream, &["remote", "add", "origin", &origin_str])?;
        run_git(&upstream, &["push", "-q", "-u", "origin", "main"])?;

        let work_str = work.to_string_lossy().to_string();
        run_git(root, &["clone", "-q", &origin_str, &work_str])?;
        configure_identity(&work)?;

        Ok(Self {
            _temp: temp,
            work,
            upstream,
        })
    }

    /// Path of the working clone the daemon tracks.
    pub fn path(&self) -> &Path {
        &self.work
    }

    /// Run git in the working clone and return trimmed stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        run_git(&self.work, args)
    }

    /// Commit `file` in the upstream clone, push it, and return the new head.
    pub fn push_upstream_commit(&self, file: &str) -> Result<String> {
        fs::write(self.upstream.join(file), format!("{file}\n"))
            .with_context(|| format!("write {file}"))?;
        run_git(&self.upstream, &["add", "-A"])?;
        run_git(
            &self.upstream,
            &["commit", "-q", "-m", &format!("add {file}")],
        )?;
        run_git(&self.upstream, &["push", "-q", "origin", "main"])?;
        run_git(&self.upstream, &["rev-parse", "HEAD"])
    }
}

fn configure_identity(dir: &Path) -> Result<()> {
    run_git(dir, &["config", "user.name", "gitit tests"])?;
    run_git(dir, &["config", "user.email", "gitit@example.invalid"])?;
    run_git(dir, &["config", "commit.gpgsign", "false"])?;
    Ok(())
}

fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
