//! Git adapter for the reconcile loop.
//!
//! The daemon only resolves refs, fetches, fast-forward pulls and hard
//! resets. Every invocation goes through a [`CommandRunner`] so each one gets
//! the configured local or origin timeout.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::io::config::GitConfig;
use crate::io::process::{CommandRunner, CommandSpec, RunOutcome, RunResult};

/// Failure of a git probe or git operation.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("`{command}` could not be started: {reason}")]
    Spawn { command: String, reason: String },
    #[error("`{command}` timed out after {timeout:?}")]
    TimedOut {
        command: String,
        timeout: Option<Duration>,
    },
    #[error("`{command}` timed out and could not be killed: {reason}")]
    KillFailed { command: String, reason: String },
    #[error("`{command}` exited with {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("branch `{branch}` has no upstream configured")]
    NoUpstream { branch: String },
    #[error("HEAD is detached, there is no branch to track")]
    DetachedHead,
    #[error("`{command}` printed an empty result")]
    EmptyOutput { command: String },
    #[error(transparent)]
    Runner(#[from] anyhow::Error),
}

/// Queries and operations the reconcile loop needs from a repository.
pub trait GitProbe {
    /// Name of the checked-out branch. Errors on detached HEAD.
    fn current_branch(&self) -> Result<String, GitError>;
    /// Commit id of `HEAD`.
    fn local_head(&self) -> Result<String, GitError>;
    /// Commit id of `<branch>@{upstream}` after refreshing remote refs.
    fn remote_head(&self, branch: &str) -> Result<String, GitError>;
    /// Fast-forward the working tree to its upstream.
    fn pull(&self) -> Result<(), GitError>;
    /// Discard local changes (`reset --hard`).
    fn hard_reset(&self) -> Result<(), GitError>;
}

impl<P: GitProbe + ?Sized> GitProbe for &P {
    fn current_branch(&self) -> Result<String, GitError> {
        (**self).current_branch()
    }

    fn local_head(&self) -> Result<String, GitError> {
        (**self).local_head()
    }

    fn remote_head(&self, branch: &str) -> Result<String, GitError> {
        (**self).remote_head(branch)
    }

    fn pull(&self) -> Result<(), GitError> {
        (**self).pull()
    }

    fn hard_reset(&self) -> Result<(), GitError> {
        (**self).hard_reset()
    }
}

/// [`GitProbe`] backed by the git binary.
#[derive(Debug, Clone)]
pub struct Git<R> {
    runner: R,
    binary: String,
    workdir: PathBuf,
    local_timeout: Option<Duration>,
    origin_timeout: Option<Duration>,
}

impl<R: CommandRunner> Git<R> {
    pub fn new(runner: R, workdir: impl Into<PathBuf>, config: &GitConfig) -> Self {
        Self {
            runner,
            binary: config.binary().to_string(),
            workdir: workdir.into(),
            local_timeout: config.local_timeout(),
            origin_timeout: config.origin_timeout(),
        }
    }

    fn local(&self, args: &[&str]) -> Result<String, GitError> {
        self.run_capture(args, self.local_timeout)
    }

    fn origin(&self, args: &[&str]) -> Result<String, GitError> {
        self.run_capture(args, self.origin_timeout)
    }

    fn run_capture(&self, args: &[&str], timeout: Option<Duration>) -> Result<String, GitError> {
        let spec = CommandSpec::new(self.binary.as_str(), self.workdir.as_path())
            .args(args.iter().copied())
            .timeout(timeout);
        let result = self.runner.run(&spec)?;
        check_result(&spec, result)
    }
}

impl<R: CommandRunner> GitProbe for Git<R> {
    #[instrument(skip_all)]
    fn current_branch(&self) -> Result<String, GitError> {
        let name = self.local(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(GitError::DetachedHead);
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    fn local_head(&self) -> Result<String, GitError> {
        require_commit("rev-parse HEAD", self.local(&["rev-parse", "HEAD"])?)
    }

    #[instrument(skip_all, fields(branch = %branch))]
    fn remote_head(&self, branch: &str) -> Result<String, GitError> {
        let ref_name = format!("refs/heads/{branch}");
        let upstream = self.local(&["for-each-ref", "--format=%(upstream)", &ref_name])?;
        if upstream.is_empty() {
            return Err(GitError::NoUpstream {
                branch: branch.to_string(),
            });
        }
        debug!(%upstream, "fetching upstream");
        self.origin(&["fetch", "--quiet"])?;
        let rev = format!("{branch}@{{upstream}}");
        require_commit("rev-parse @{upstream}", self.local(&["rev-parse", &rev])?)
    }

    #[instrument(skip_all)]
    fn pull(&self) -> Result<(), GitError> {
        self.origin(&["pull", "--ff-only", "--quiet"])?;
        Ok(())
    }

    #[instrument(skip_all)]
    fn hard_reset(&self) -> Result<(), GitError> {
        self.local(&["reset", "--hard", "--quiet"])?;
        Ok(())
    }
}

/// Map a finished git invocation to its trimmed stdout or a [`GitError`].
fn check_result(spec: &CommandSpec, result: RunResult) -> Result<String, GitError> {
    let command = spec.display();
    match result.outcome {
        RunOutcome::Exited(Some(0)) => Ok(result.stdout_lossy().trim().to_string()),
        RunOutcome::Exited(code) => Err(GitError::Failed {
            command,
            code,
            stderr: result.stderr_lossy().trim().to_string(),
        }),
        RunOutcome::TimedOut => Err(GitError::TimedOut {
            command,
            timeout: spec.timeout,
        }),
        RunOutcome::SpawnFailed(reason) => Err(GitError::Spawn { command, reason }),
        RunOutcome::KillFailed(reason) => Err(GitError::KillFailed { command, reason }),
    }
}

fn require_commit(command: &str, value: String) -> Result<String, GitError> {
    if value.is_empty() {
        return Err(GitError::EmptyOutput {
            command: command.to_string(),
        });
    }
    Ok(value)
}
