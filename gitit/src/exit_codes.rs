//! Stable exit codes for the gitit binary.

/// Normal shutdown after a termination signal, or a successful one-shot mode.
pub const OK: i32 = 0;
/// Fatal startup error, failed one-shot mode, or the reconcile loop stopped
/// after reaching an error threshold.
pub const FAILURE: i32 = 1;
