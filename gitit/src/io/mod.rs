//! I/O adapters for the daemon.

pub mod config;
pub mod git;
pub mod process;
