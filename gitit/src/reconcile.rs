//! Reconcile loop: one cycle compares local and remote heads and, when they
//! differ, resets (optionally), pulls and rebuilds.
//!
//! The [`Reconciler`] is the single owner of the error counters and of the
//! loop state. It is driven one cycle at a time by the lifecycle controller
//! (`daemon`); nothing else mutates it.

use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use crate::core::counters::ErrorCounters;
use crate::core::types::{ErrorKind, GitPhase, LoopState, RepoSnapshot, StopReason};
use crate::io::config::{GititConfig, RebuildStep};
use crate::io::git::{GitError, GitProbe};
use crate::io::process::CommandRunner;
use crate::rebuild::{RebuildOutcome, rebuild};

/// Read-only inputs of the reconcile loop, taken from the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    pub workdir: PathBuf,
    pub reset_before_pull: bool,
    pub steps: Vec<RebuildStep>,
    pub git_errors_before_stop: u32,
    pub build_errors_before_stop: u32,
}

impl ReconcileSettings {
    pub fn from_config(config: &GititConfig) -> Self {
        Self {
            workdir: config.general.context_path.clone(),
            reset_before_pull: config.git.reset_before_pull,
            steps: config.rebuild.commands.clone(),
            git_errors_before_stop: config.git.consecutive_git_errors_before_stop,
            build_errors_before_stop: config.rebuild.consecutive_build_errors_before_stop,
        }
    }
}

/// What happened during one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Local and remote heads matched; nothing was pulled or rebuilt.
    UpToDate { head: String },
    /// Upstream changes were pulled and the pipeline ran.
    Updated {
        from: String,
        to: String,
        rebuild: RebuildOutcome,
    },
    /// A git probe or operation failed; the cycle ended early.
    GitFailed { phase: GitPhase, error: String },
    /// The pipeline could not be driven to an outcome (runner failure).
    RebuildAborted { error: String },
    /// The loop was already stopped; nothing ran.
    Halted,
}

/// Outcome of a cycle plus the stop reason if the loop is now stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub stop: Option<StopReason>,
}

/// Reconcile loop for a single tracked branch.
#[derive(Debug)]
pub struct Reconciler<P, R> {
    probe: P,
    runner: R,
    branch: String,
    settings: ReconcileSettings,
    counters: ErrorCounters,
    state: LoopState,
    stop: Option<StopReason>,
}

impl<P: GitProbe, R: CommandRunner> Reconciler<P, R> {
    pub fn new(
        probe: P,
        runner: R,
        branch: impl Into<String>,
        settings: ReconcileSettings,
    ) -> Self {
        let counters = ErrorCounters::new(
            settings.git_errors_before_stop,
            settings.build_errors_before_stop,
        );
        Self {
            probe,
            runner,
            branch: branch.into(),
            settings,
            counters,
            state: LoopState::Idle,
            stop: None,
        }
    }

    /// Resolve the checked-out branch and build a reconciler tracking it.
    ///
    /// Failing here is fatal for the daemon: without a branch there is
    /// nothing to poll.
    pub fn for_current_branch(
        probe: P,
        runner: R,
        settings: ReconcileSettings,
    ) -> Result<Self, GitError> {
        let branch = probe.current_branch()?;
        info!(%branch, "checked out on branch");
        Ok(Self::new(probe, runner, branch, settings))
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn counters(&self) -> &ErrorCounters {
        &self.counters
    }

    /// Run one reconcile cycle to completion.
    pub fn run_cycle(&mut self) -> CycleReport {
        if let Some(reason) = &self.stop {
            debug!("reconcile loop is stopped, skipping cycle");
            return CycleReport {
                outcome: CycleOutcome::Halted,
                stop: Some(reason.clone()),
            };
        }

        self.transition(LoopState::Comparing);
        let snapshot = match self.snapshot() {
            Ok(snapshot) => snapshot,
            Err(err) => return self.git_failed(GitPhase::Compare, err),
        };
        if snapshot.is_up_to_date() {
            info!(head = %snapshot.local, "same hash, nothing changed");
            self.counters.record_success(ErrorKind::Git);
            return self.finish(
                CycleOutcome::UpToDate {
                    head: snapshot.local,
                },
                None,
            );
        }
        info!(
            branch = %snapshot.branch,
            local = %snapshot.local,
            remote = %snapshot.remote,
            "hash changed"
        );

        if self.settings.reset_before_pull {
            self.transition(LoopState::Resetting);
            if let Err(err) = self.probe.hard_reset() {
                return self.git_failed(GitPhase::Reset, err);
            }
            info!("local branch reset");
        }

        self.transition(LoopState::Pulling);
        if let Err(err) = self.probe.pull() {
            return self.git_failed(GitPhase::Pull, err);
        }
        self.counters.record_success(ErrorKind::Git);
        info!(head = %snapshot.remote, "local branch updated");

        self.transition(LoopState::Rebuilding);
        let rebuild = match rebuild(&self.runner, &self.settings.workdir, &self.settings.steps) {
            Ok(outcome) => outcome,
            Err(err) => {
                let error = format!("rebuild aborted: {err:#}");
                return self.build_failed(error.clone(), CycleOutcome::RebuildAborted { error });
            }
        };

        let outcome = CycleOutcome::Updated {
            from: snapshot.local,
            to: snapshot.remote,
            rebuild: rebuild.clone(),
        };
        if rebuild.is_success() {
            self.counters.record_success(ErrorKind::Build);
            info!("rebuild succeeded");
            self.finish(outcome, None)
        } else {
            self.build_failed(rebuild.to_string(), outcome)
        }
    }

    fn snapshot(&self) -> Result<RepoSnapshot, GitError> {
        let local = self.probe.local_head()?;
        let remote = self.probe.remote_head(&self.branch)?;
        Ok(RepoSnapshot {
            branch: self.branch.clone(),
            local,
            remote,
        })
    }

    fn git_failed(&mut self, phase: GitPhase, err: GitError) -> CycleReport {
        let error = err.to_string();
        let stop = self
            .counters
            .record_failure(ErrorKind::Git, &format!("{phase}: {error}"));
        warn!(
            %phase,
            err = %error,
            consecutive = self.counters.git.consecutive(),
            threshold = self.counters.git.threshold(),
            "git operation failed"
        );
        self.finish(CycleOutcome::GitFailed { phase, error }, stop)
    }

    fn build_failed(&mut self, error: String, outcome: CycleOutcome) -> CycleReport {
        let stop = self.counters.record_failure(ErrorKind::Build, &error);
        warn!(
            err = %error,
            consecutive = self.counters.build.consecutive(),
            threshold = self.counters.build.threshold(),
            "rebuild failed"
        );
        self.finish(outcome, stop)
    }

    fn finish(&mut self, outcome: CycleOutcome, stop: Option<StopReason>) -> CycleReport {
        match &stop {
            Some(reason) => {
                error!(%reason, "error threshold reached, stopping");
                self.transition(LoopState::Stopped);
                self.stop = Some(reason.clone());
            }
            None => self.transition(LoopState::Idle),
        }
        CycleReport { outcome, stop }
    }

    fn transition(&mut self, next: LoopState) {
        debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
    }
}
