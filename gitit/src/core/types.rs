//! Shared deterministic types for the reconcile loop.
//!
//! These types carry no I/O and are cheap to clone into log fields and
//! cycle reports.

use std::fmt;

/// State of the reconcile loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for the next tick.
    Idle,
    /// Resolving local and remote heads.
    Comparing,
    /// Running `git reset --hard` before the pull.
    Resetting,
    /// Pulling upstream changes.
    Pulling,
    /// Running the rebuild pipeline.
    Rebuilding,
    /// An error threshold was reached. Terminal.
    Stopped,
}

impl LoopState {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopState::Idle => "idle",
            LoopState::Comparing => "comparing",
            LoopState::Resetting => "resetting",
            LoopState::Pulling => "pulling",
            LoopState::Rebuilding => "rebuilding",
            LoopState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which git step of a cycle failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitPhase {
    Compare,
    Reset,
    Pull,
}

impl fmt::Display for GitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GitPhase::Compare => "compare",
            GitPhase::Reset => "reset",
            GitPhase::Pull => "pull",
        })
    }
}

/// The two independently counted failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Git,
    Build,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Git => "git",
            ErrorKind::Build => "build",
        })
    }
}

/// Why the loop entered [`LoopState::Stopped`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReason {
    pub kind: ErrorKind,
    pub consecutive: u32,
    pub threshold: u32,
    /// Description of the failure that reached the threshold.
    pub last_error: String,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} consecutive {} errors (threshold {}), last error: {}",
            self.consecutive, self.kind, self.threshold, self.last_error
        )
    }
}

/// Local and remote heads of the tracked branch, captured once per cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSnapshot {
    pub branch: String,
    pub local: String,
    pub remote: String,
}

impl RepoSnapshot {
    pub fn is_up_to_date(&self) -> bool {
        self.local == self.remote
    }
}
