//! Consecutive-error bookkeeping for git and build failures.

use crate::core::types::{ErrorKind, StopReason};

/// Saturating counter of consecutive failures compared against a threshold.
///
/// A threshold of 0 disables stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCounter {
    consecutive: u32,
    threshold: u32,
}

impl ErrorCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold,
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Count one failure and return the new consecutive total.
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive = self.consecutive.saturating_add(1);
        self.consecutive
    }

    pub fn reached(&self) -> bool {
        self.threshold > 0 && self.consecutive >= self.threshold
    }
}

/// The two independent counters owned by the reconcile loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCounters {
    pub git: ErrorCounter,
    pub build: ErrorCounter,
}

impl ErrorCounters {
    pub fn new(git_threshold: u32, build_threshold: u32) -> Self {
        Self {
            git: ErrorCounter::new(git_threshold),
            build: ErrorCounter::new(build_threshold),
        }
    }

    fn get_mut(&mut self, kind: ErrorKind) -> &mut ErrorCounter {
        match kind {
            ErrorKind::Git => &mut self.git,
            ErrorKind::Build => &mut self.build,
        }
    }

    pub fn record_success(&mut self, kind: ErrorKind) {
        self.get_mut(kind).record_success();
    }

    /// Count a failure of `kind`; returns the stop reason if the threshold is met.
    pub fn record_failure(&mut self, kind: ErrorKind, error: &str) -> Option<StopReason> {
        let counter = self.get_mut(kind);
        counter.record_failure();
        counter.reached().then(|| StopReason {
            kind,
            consecutive: counter.consecutive(),
            threshold: counter.threshold(),
            last_error: error.to_string(),
        })
    }
}
