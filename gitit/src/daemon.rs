//! Lifecycle controller: periodic timer, termination signals, orderly stop.
//!
//! The event loop selects over `{shutdown requested, timer fired}` and handles
//! exactly one event per iteration. The tick handler runs synchronously on the
//! runtime thread, so cycles never overlap; ticks that elapse while a cycle is
//! busy are skipped, not queued. Shutdown is polled first, which means a
//! signal delivered mid-cycle takes effect as soon as that cycle returns.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

use crate::core::types::StopReason;

/// Why the lifecycle loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleExit {
    /// A termination signal was received (name of the signal).
    Signal(&'static str),
    /// The tick handler asked to stop.
    Stopped(StopReason),
}

/// Subscription to SIGINT and SIGTERM.
///
/// Installed once before the loop starts so signals delivered while a cycle
/// runs are buffered until the loop polls again.
pub struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignals {
    /// Must be called from within a tokio runtime.
    pub fn install() -> Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).context("install SIGINT handler")?,
            terminate: signal(SignalKind::terminate()).context("install SIGTERM handler")?,
        })
    }

    /// Wait for the next SIGINT or SIGTERM and return its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

/// Call `on_tick` every `period` until `shutdown` resolves or `on_tick` breaks.
///
/// The first tick fires one `period` after the call.
pub async fn run_until_shutdown<S, F>(
    period: Duration,
    shutdown: S,
    mut on_tick: F,
) -> LifecycleExit
where
    S: Future<Output = &'static str>,
    F: FnMut() -> ControlFlow<StopReason>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            name = &mut shutdown => {
                info!(signal = name, "shutdown requested");
                return LifecycleExit::Signal(name);
            }
            _ = ticker.tick() => {
                debug!("tick");
                if let ControlFlow::Break(reason) = on_tick() {
                    return LifecycleExit::Stopped(reason);
                }
            }
        }
    }
}

/// Build the single-threaded runtime the daemon runs on.
pub fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")
}
