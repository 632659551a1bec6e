//! Tracing setup for the daemon.
//!
//! Every state transition, git failure and rebuild step is reported through
//! `tracing`; this module only wires the subscriber.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `info` if unset, which is the level the
/// reconcile loop reports cycles at.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=gitit=debug gitit watch
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
