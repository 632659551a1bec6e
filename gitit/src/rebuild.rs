//! Rebuild pipeline: run the configured steps in order, stopping at the first
//! failure.
//!
//! Step commands are split on whitespace into a program and its arguments.
//! There is no shell in between: quotes, globs, pipes, redirections and
//! variables are passed through literally. Point a step at a script when it
//! needs shell features.

use std::fmt;
use std::path::Path;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::io::config::RebuildStep;
use crate::io::process::{CommandRunner, CommandSpec, RunOutcome};

/// Why a single step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepFailure {
    /// The command exited with a non-zero code (`None`: killed by a signal).
    Exited(Option<i32>),
    TimedOut { timeout_secs: u64 },
    SpawnFailed(String),
    /// The step timed out and the process could not be killed.
    KillFailed(String),
    /// The command string contains no program.
    EmptyCommand,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepFailure::Exited(Some(code)) => write!(f, "exited with code {code}"),
            StepFailure::Exited(None) => f.write_str("terminated by a signal"),
            StepFailure::TimedOut { timeout_secs } => write!(f, "timed out after {timeout_secs}s"),
            StepFailure::SpawnFailed(reason) => write!(f, "could not be started: {reason}"),
            StepFailure::KillFailed(reason) => {
                write!(f, "timed out and could not be killed: {reason}")
            }
            StepFailure::EmptyCommand => f.write_str("is empty"),
        }
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildOutcome {
    AllSucceeded,
    /// `index` is 0-based; later steps were not run.
    FailedAtStep {
        index: usize,
        command: String,
        reason: StepFailure,
    },
}

impl RebuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RebuildOutcome::AllSucceeded)
    }
}

impl fmt::Display for RebuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildOutcome::AllSucceeded => f.write_str("all rebuild steps succeeded"),
            RebuildOutcome::FailedAtStep {
                index,
                command,
                reason,
            } => write!(f, "step {} `{command}` {reason}", index + 1),
        }
    }
}

/// Split a step command line into program and arguments.
pub fn split_command(command: &str) -> Option<(&str, Vec<&str>)> {
    let mut words = command.split_whitespace();
    let program = words.next()?;
    Some((program, words.collect()))
}

/// Run `steps` in order inside `workdir`.
///
/// `Err` only surfaces failures of the runner itself; step failures are
/// reported as [`RebuildOutcome::FailedAtStep`].
#[instrument(skip_all, fields(steps = steps.len()))]
pub fn rebuild<R: CommandRunner>(
    runner: &R,
    workdir: &Path,
    steps: &[RebuildStep],
) -> Result<RebuildOutcome> {
    info!("rebuilding");
    for (index, step) in steps.iter().enumerate() {
        let step_no = index + 1;
        let Some((program, args)) = split_command(&step.command) else {
            warn!(step = step_no, "rebuild step has an empty command");
            return Ok(failed(index, step, StepFailure::EmptyCommand));
        };
        let spec = CommandSpec::new(program, workdir)
            .args(args)
            .timeout(step.timeout());

        info!(
            step = step_no,
            command = %step.command,
            timeout_secs = step.timeout,
            "running rebuild step"
        );
        let result = runner.run(&spec)?;
        let stdout = result.stdout_lossy();
        let stderr = result.stderr_lossy();
        if !stdout.trim().is_empty() {
            debug!(step = step_no, stdout = %stdout.trim_end(), "rebuild step output");
        }

        let failure = match result.outcome {
            RunOutcome::Exited(Some(0)) => None,
            RunOutcome::Exited(code) => Some(StepFailure::Exited(code)),
            RunOutcome::TimedOut => Some(StepFailure::TimedOut {
                timeout_secs: step.timeout,
            }),
            RunOutcome::SpawnFailed(reason) => Some(StepFailure::SpawnFailed(reason)),
            RunOutcome::KillFailed(reason) => Some(StepFailure::KillFailed(reason)),
        };
        match failure {
            None => {
                info!(
                    step = step_no,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    "rebuild step succeeded"
                );
            }
            Some(reason) => {
                warn!(
                    step = step_no,
                    command = %step.command,
                    reason = %reason,
                    stderr = %stderr.trim_end(),
                    "rebuild step failed"
                );
                return Ok(failed(index, step, reason));
            }
        }
    }
    Ok(RebuildOutcome::AllSucceeded)
}

fn failed(index: usize, step: &RebuildStep, reason: StepFailure) -> RebuildOutcome {
    RebuildOutcome::FailedAtStep {
        index,
        command: step.command.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::io::process::ProcessRunner;
    use crate::test_support::{ScriptedRunner, exit_result, ok_result, outcome_result};

    #[test]
    fn splits_on_any_whitespace() {
        let (program, args) = split_command("  cargo   build\t--release ").expect("split");
        assert_eq!(program, "cargo");
        assert_eq!(args, vec!["build", "--release"]);
        assert!(split_command("   ").is_none());
    }

    #[test]
    fn quotes_are_not_interpreted() {
        let (program, args) = split_command("echo \"a b\"").expect("split");
        assert_eq!(program, "echo");
        assert_eq!(args, vec!["\"a", "b\""]);
    }

    #[test]
    fn empty_pipeline_succeeds_without_running_anything() {
        let runner = ScriptedRunner::new(Vec::new());
        let outcome = rebuild(&runner, Path::new("."), &[]).expect("rebuild");
        assert_eq!(outcome, RebuildOutcome::AllSucceeded);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn failing_second_step_skips_third() {
        let runner = ScriptedRunner::new(vec![ok_result(""), exit_result(2), ok_result("")]);
        let steps = vec![
            RebuildStep::new("make deps", 0),
            RebuildStep::new("make build", 30),
            RebuildStep::new("make install", 0),
        ];

        let outcome = rebuild(&runner, Path::new("/srv/app"), &steps).expect("rebuild");

        assert_eq!(
            outcome,
            RebuildOutcome::FailedAtStep {
                index: 1,
                command: "make build".to_string(),
                reason: StepFailure::Exited(Some(2)),
            }
        );
        assert_eq!(
            outcome.to_string(),
            "step 2 `make build` exited with code 2"
        );
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].args, vec!["build"]);
        assert_eq!(calls[1].timeout, Some(Duration::from_secs(30)));
        assert_eq!(calls[0].timeout, None);
    }

    #[test]
    fn timeout_and_kill_failure_are_step_failures() {
        let steps = vec![RebuildStep::new("sleep 60", 1)];

        let runner = ScriptedRunner::new(vec![outcome_result(RunOutcome::TimedOut)]);
        let outcome = rebuild(&runner, Path::new("."), &steps).expect("rebuild");
        assert!(matches!(
            outcome,
            RebuildOutcome::FailedAtStep {
                reason: StepFailure::TimedOut { timeout_secs: 1 },
                ..
            }
        ));

        let runner = ScriptedRunner::new(vec![outcome_result(RunOutcome::KillFailed(
            "EPERM".to_string(),
        ))]);
        let outcome = rebuild(&runner, Path::new("."), &steps).expect("rebuild");
        assert!(matches!(
            outcome,
            RebuildOutcome::FailedAtStep {
                reason: StepFailure::KillFailed(_),
                ..
            }
        ));
    }

    #[test]
    fn blank_command_fails_without_spawning() {
        let runner = ScriptedRunner::new(Vec::new());
        let steps = vec![RebuildStep::new(" ", 0)];
        let outcome = rebuild(&runner, Path::new("."), &steps).expect("rebuild");
        assert!(matches!(
            outcome,
            RebuildOutcome::FailedAtStep {
                index: 0,
                reason: StepFailure::EmptyCommand,
                ..
            }
        ));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn runs_real_processes_in_workdir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let steps = vec![
            RebuildStep::new("touch first", 5),
            RebuildStep::new("false", 5),
            RebuildStep::new("touch third", 5),
        ];

        let outcome =
            rebuild(&ProcessRunner::default(), temp.path(), &steps).expect("rebuild");

        assert!(matches!(
            outcome,
            RebuildOutcome::FailedAtStep { index: 1, .. }
        ));
        assert!(temp.path().join("first").exists());
        assert!(!temp.path().join("third").exists());
    }

    #[test]
    fn missing_program_is_a_spawn_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let steps = vec![RebuildStep::new("gitit-no-such-build-tool --all", 0)];
        let outcome =
            rebuild(&ProcessRunner::default(), temp.path(), &steps).expect("rebuild");
        assert!(matches!(
            outcome,
            RebuildOutcome::FailedAtStep {
                reason: StepFailure::SpawnFailed(_),
                ..
            }
        ));
    }
}
