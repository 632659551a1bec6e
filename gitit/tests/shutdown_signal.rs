//! Lifecycle tests for `gitit watch` as a real process.
//!
//! SIGTERM must end the daemon promptly with a clean exit; reaching an error
//! threshold must end it with a failure exit.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use gitit::exit_codes;
use gitit::io::config::{GititConfig, RebuildStep, write_config};
use gitit::test_support::TestRepo;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use wait_timeout::ChildExt;

fn spawn_watch(config_path: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_gitit"))
        .arg("watch")
        .arg("--config")
        .arg(config_path)
        .env("RUST_LOG", "info")
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn gitit watch")
}

/// Forward stderr lines over a channel so the test can wait with a deadline.
fn stderr_lines(child: &mut Child) -> mpsc::Receiver<String> {
    let stderr = child.stderr.take().expect("stderr");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn wait_for_line(rx: &mpsc::Receiver<String>, needle: &str) {
    loop {
        let line = rx
            .recv_timeout(Duration::from_secs(15))
            .unwrap_or_else(|_| panic!("no `{needle}` line on stderr"));
        if line.contains(needle) {
            return;
        }
    }
}

#[test]
fn sigterm_stops_watch_with_clean_exit() {
    let repo = TestRepo::new().expect("repo");
    let temp = tempfile::tempdir().expect("tempdir");
    let config_path = temp.path().join("gitit.json");
    let mut config = GititConfig::default();
    config.general.check_interval_seconds = 3600;
    config.general.context_path = repo.path().to_path_buf();
    config.rebuild.commands = Vec::new();
    write_config(&config_path, &config).expect("write config");

    let mut child = spawn_watch(&config_path);
    let lines = stderr_lines(&mut child);
    wait_for_line(&lines, "watching branch");

    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).expect("send SIGTERM");

    let status = child
        .wait_timeout(Duration::from_secs(10))
        .expect("wait")
        .expect("gitit did not exit after SIGTERM");
    assert_eq!(status.code(), Some(exit_codes::OK));
}

#[test]
fn build_error_threshold_stops_watch_with_failure() {
    let repo = TestRepo::new().expect("repo");
    repo.push_upstream_commit("change.txt").expect("push");
    let temp = tempfile::tempdir().expect("tempdir");
    let config_path = temp.path().join("gitit.json");
    let mut config = GititConfig::default();
    config.general.check_interval_seconds = 1;
    config.general.context_path = repo.path().to_path_buf();
    config.rebuild.consecutive_build_errors_before_stop = 1;
    config.rebuild.commands = vec![RebuildStep::new("false", 10)];
    write_config(&config_path, &config).expect("write config");

    let mut child = spawn_watch(&config_path);
    let lines = stderr_lines(&mut child);

    let status = match child.wait_timeout(Duration::from_secs(30)).expect("wait") {
        Some(status) => status,
        None => {
            let _ = child.kill();
            panic!("gitit kept running past the build error threshold");
        }
    };
    assert_eq!(status.code(), Some(exit_codes::FAILURE));
    let output: Vec<String> = lines.iter().collect();
    assert!(output.iter().any(|line| line.contains("consecutive build errors")));
}
