//! CLI tests for the one-shot modes.
//!
//! Spawns the gitit binary and checks exit codes and the files it writes.

use std::fs;
use std::process::Command;

use gitit::exit_codes;
use gitit::io::config::{GititConfig, RebuildStep, load_config, write_config};

fn gitit() -> Command {
    Command::new(env!("CARGO_BIN_EXE_gitit"))
}

#[test]
fn generate_config_writes_default_file() {
    let temp = tempfile::tempdir().expect("tempdir");

    let status = gitit()
        .current_dir(temp.path())
        .arg("generate-config")
        .status()
        .expect("gitit generate-config");

    assert_eq!(status.code(), Some(exit_codes::OK));
    let written = load_config(&temp.path().join("gitit.json")).expect("load");
    assert_eq!(written, GititConfig::default());
    let raw = fs::read_to_string(temp.path().join("gitit.json")).expect("read");
    assert!(raw.contains("\"checkIntervalSeconds\": 10"));
}

#[test]
fn generate_config_keeps_existing_file_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("custom.json");
    fs::write(&path, "{\"general\":{}}").expect("write");

    let output = gitit()
        .arg("generate-config")
        .arg("--config")
        .arg(&path)
        .output()
        .expect("gitit generate-config");

    assert_eq!(output.status.code(), Some(exit_codes::FAILURE));
    assert!(String::from_utf8_lossy(&output.stderr).contains("already exists"));
    assert_eq!(fs::read_to_string(&path).expect("read"), "{\"general\":{}}");

    let status = gitit()
        .args(["generate-config", "--force", "--config"])
        .arg(&path)
        .status()
        .expect("gitit generate-config --force");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert_eq!(load_config(&path).expect("load"), GititConfig::default());
}

#[test]
fn dry_run_exit_code_follows_pipeline() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("gitit.json");
    let mut config = GititConfig::default();
    config.general.context_path = temp.path().to_path_buf();

    config.rebuild.commands = vec![
        RebuildStep::new("touch first", 5),
        RebuildStep::new("false", 5),
        RebuildStep::new("touch never", 5),
    ];
    write_config(&path, &config).expect("write");
    let status = gitit()
        .arg("dry-run")
        .arg("--config")
        .arg(&path)
        .status()
        .expect("gitit dry-run");
    assert_eq!(status.code(), Some(exit_codes::FAILURE));
    assert!(temp.path().join("first").exists());
    assert!(!temp.path().join("never").exists());

    config.rebuild.commands = vec![RebuildStep::new("touch done", 5)];
    write_config(&path, &config).expect("write");
    let status = gitit()
        .arg("dry-run")
        .arg("--config")
        .arg(&path)
        .status()
        .expect("gitit dry-run");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert!(temp.path().join("done").exists());
}

#[test]
fn watch_outside_a_repository_fails_at_startup() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("gitit.json");
    let mut config = GititConfig::default();
    config.general.context_path = temp.path().to_path_buf();
    write_config(&path, &config).expect("write");

    let status = gitit()
        .arg("--config")
        .arg(&path)
        .status()
        .expect("gitit watch");

    assert_eq!(status.code(), Some(exit_codes::FAILURE));
}
