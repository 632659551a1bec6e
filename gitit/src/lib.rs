//! Local automation daemon that follows a git branch and rebuilds on change.
//!
//! Every polling interval the daemon compares the checked-out branch with its
//! upstream. When they differ it optionally hard-resets, fast-forward pulls,
//! and runs the configured rebuild steps. Consecutive git or build failures
//! past their thresholds stop the daemon.
//!
//! - **[`core`]**: Pure logic (loop states, error counters). No I/O.
//! - **[`io`]**: Side-effecting adapters (configuration file, git, processes).
//!
//! [`rebuild`], [`reconcile`] and [`daemon`] build the pipeline, the reconcile
//! cycle and the lifecycle loop on top of them; [`startup`] dispatches the CLI
//! modes.

pub mod core;
pub mod daemon;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod rebuild;
pub mod reconcile;
pub mod startup;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
