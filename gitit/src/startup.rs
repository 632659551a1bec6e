//! Startup modes: generate the default config, run the pipeline once, or
//! watch the branch.
//!
//! The mode is resolved once from the command line; each mode is a separate
//! top-level operation returning the process exit code.

use std::ops::ControlFlow;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{error, info};

use crate::daemon::{LifecycleExit, ShutdownSignals, build_runtime, run_until_shutdown};
use crate::exit_codes;
use crate::io::config::{GititConfig, load_or_default, write_config};
use crate::io::git::Git;
use crate::io::process::ProcessRunner;
use crate::rebuild::{RebuildOutcome, rebuild};
use crate::reconcile::{ReconcileSettings, Reconciler};

/// What the process was started to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    /// Write the default configuration and exit.
    GenerateConfig { force: bool },
    /// Run the rebuild pipeline once and exit, without polling.
    DryRun,
    /// Poll the tracked branch until a signal or an error threshold.
    Watch,
}

/// Run `mode` and return the process exit code.
pub fn run(mode: StartupMode, config_path: &Path) -> Result<i32> {
    match mode {
        StartupMode::GenerateConfig { force } => {
            generate_config(config_path, force)?;
            Ok(exit_codes::OK)
        }
        StartupMode::DryRun => {
            let config = load_or_default(config_path);
            let outcome = dry_run(&config)?;
            if outcome.is_success() {
                info!("dry run finished");
                Ok(exit_codes::OK)
            } else {
                error!(%outcome, "dry run failed");
                eprintln!("gitit: dry run failed: {outcome}");
                Ok(exit_codes::FAILURE)
            }
        }
        StartupMode::Watch => {
            let config = load_or_default(config_path);
            match watch(&config)? {
                LifecycleExit::Signal(_) => {
                    info!("gitit stopped, exiting");
                    Ok(exit_codes::OK)
                }
                LifecycleExit::Stopped(reason) => {
                    eprintln!("gitit: stopped: {reason}");
                    Ok(exit_codes::FAILURE)
                }
            }
        }
    }
}

/// Write the default configuration to `path`.
///
/// Refuses to replace an existing file unless `force` is set.
pub fn generate_config(path: &Path, force: bool) -> Result<()> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &GititConfig::default())
        .with_context(|| format!("generate {}", path.display()))?;
    info!(path = %path.display(), "configuration file generated");
    Ok(())
}

/// Run the rebuild pipeline once in the configured context path.
pub fn dry_run(config: &GititConfig) -> Result<RebuildOutcome> {
    let runner = ProcessRunner::default();
    rebuild(
        &runner,
        &config.general.context_path,
        &config.rebuild.commands,
    )
}

/// Track the checked-out branch until a termination signal or until the
/// reconcile loop stops.
///
/// Fails only if the branch cannot be resolved or the runtime or signal
/// handlers cannot be set up.
pub fn watch(config: &GititConfig) -> Result<LifecycleExit> {
    let runner = ProcessRunner::default();
    let git = Git::new(runner.clone(), &config.general.context_path, &config.git);
    let mut reconciler =
        Reconciler::for_current_branch(git, runner, ReconcileSettings::from_config(config))
            .context("resolve tracked branch")?;

    let runtime = build_runtime()?;
    runtime.block_on(async {
        let mut signals = ShutdownSignals::install()?;
        info!(
            branch = reconciler.branch(),
            interval_secs = config.general.check_interval_seconds,
            context = %config.general.context_path.display(),
            "watching branch for upstream changes"
        );
        let exit = run_until_shutdown(config.general.check_interval(), signals.recv(), || {
            match reconciler.run_cycle().stop {
                Some(reason) => ControlFlow::Break(reason),
                None => ControlFlow::Continue(()),
            }
        })
        .await;
        Ok::<_, anyhow::Error>(exit)
    })
}
