//! Daemon configuration stored as JSON (`gitit.json` by default).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default configuration file name, resolved against the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "gitit.json";

/// Daemon configuration (JSON).
///
/// Immutable after load. Missing fields take the values of
/// [`GititConfig::default`], so a hand-written file only needs the fields it
/// changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct GititConfig {
    pub general: GeneralConfig,
    pub git: GitConfig,
    pub rebuild: RebuildConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct GeneralConfig {
    /// Seconds between two reconcile cycles. Must be > 0.
    pub check_interval_seconds: u64,
    /// Working tree that git commands and rebuild steps run in.
    pub context_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct GitConfig {
    /// Path to the git binary. Empty means `git` from `PATH`.
    pub binary_path: String,
    /// Stop after this many consecutive failed git cycles (0 = never stop).
    pub consecutive_git_errors_before_stop: u32,
    /// Timeout in seconds for git commands that only touch the local repo.
    pub local_commands_timeout: u64,
    /// Timeout in seconds for git commands that talk to the remote.
    pub origin_commands_timeout: u64,
    /// Run `git reset --hard` before every pull.
    pub reset_before_pull: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct RebuildConfig {
    /// Stop after this many consecutive failed rebuilds (0 = never stop).
    pub consecutive_build_errors_before_stop: u32,
    /// Ordered rebuild steps. May be empty.
    pub commands: Vec<RebuildStep>,
}

/// One rebuild step: a whitespace-separated command line and its timeout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RebuildStep {
    pub command: String,
    /// Seconds; 0 means no timeout.
    #[serde(default)]
    pub timeout: u64,
}

impl RebuildStep {
    pub fn new(command: impl Into<String>, timeout: u64) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        secs_to_timeout(self.timeout)
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 10,
            context_path: PathBuf::from("."),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary_path: String::new(),
            consecutive_git_errors_before_stop: 3,
            local_commands_timeout: 2,
            origin_commands_timeout: 10,
            reset_before_pull: true,
        }
    }
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            consecutive_build_errors_before_stop: 5,
            commands: vec![RebuildStep::new("cargo build --release", 600)],
        }
    }
}

impl GitConfig {
    /// Binary to invoke for git commands.
    pub fn binary(&self) -> &str {
        if self.binary_path.trim().is_empty() {
            "git"
        } else {
            &self.binary_path
        }
    }

    pub fn local_timeout(&self) -> Option<Duration> {
        secs_to_timeout(self.local_commands_timeout)
    }

    pub fn origin_timeout(&self) -> Option<Duration> {
        secs_to_timeout(self.origin_commands_timeout)
    }
}

impl GeneralConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }
}

impl GititConfig {
    pub fn validate(&self) -> Result<()> {
        if self.general.check_interval_seconds == 0 {
            return Err(anyhow!("general.checkIntervalSeconds must be > 0"));
        }
        for (index, step) in self.rebuild.commands.iter().enumerate() {
            if step.command.trim().is_empty() {
                return Err(anyhow!("rebuild.commands[{index}].command must not be empty"));
            }
        }
        Ok(())
    }
}

fn secs_to_timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Load config from a JSON file.
///
/// Fails if the file is missing, unparsable, or invalid.
pub fn load_config(path: &Path) -> Result<GititConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GititConfig =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Load config, falling back to [`GititConfig::default`] on any error.
pub fn load_or_default(path: &Path) -> GititConfig {
    match load_config(path) {
        Ok(cfg) => {
            info!(path = %path.display(), "configuration loaded");
            cfg
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                err = format!("{err:#}"),
                "could not load configuration, using defaults"
            );
            GititConfig::default()
        }
    }
}

/// Atomically write config to disk (temp file + rename), four-space indented.
pub fn write_config(path: &Path, cfg: &GititConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = to_pretty_json(cfg).context("serialize config json")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn to_pretty_json(cfg: &GititConfig) -> Result<String> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    cfg.serialize(&mut ser)?;
    Ok(String::from_utf8(out)?)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_load_round_trips_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gitit.json");
        let cfg = GititConfig::default();
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn written_file_uses_camel_case_sections() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gitit.json");
        write_config(&path, &GititConfig::default()).expect("write");
        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"checkIntervalSeconds\": 10"));
        assert!(raw.contains("\"consecutiveGitErrorsBeforeStop\": 3"));
        assert!(raw.contains("\"resetBeforePull\": true"));
        assert!(raw.contains("\n    \"general\""));
    }

    #[test]
    fn parses_hand_written_file_with_missing_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gitit.json");
        fs::write(
            &path,
            r#"{
                "general": { "checkIntervalSeconds": 30 },
                "rebuild": { "commands": [ { "command": "make all", "timeout": 5 } ] }
            }"#,
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.general.check_interval_seconds, 30);
        assert_eq!(cfg.general.context_path, PathBuf::from("."));
        assert_eq!(cfg.git, GitConfig::default());
        assert_eq!(cfg.rebuild.commands, vec![RebuildStep::new("make all", 5)]);
        assert_eq!(cfg.rebuild.consecutive_build_errors_before_stop, 5);
    }

    #[test]
    fn load_missing_falls_back_to_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let missing = temp.path().join("missing.json");
        assert!(load_config(&missing).is_err());
        assert_eq!(load_or_default(&missing), GititConfig::default());
    }

    #[test]
    fn load_malformed_falls_back_to_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gitit.json");
        fs::write(&path, "{ not json").expect("write");
        assert_eq!(load_or_default(&path), GititConfig::default());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut cfg = GititConfig::default();
        cfg.general.check_interval_seconds = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("checkIntervalSeconds"));
    }

    #[test]
    fn blank_rebuild_command_is_rejected() {
        let mut cfg = GititConfig::default();
        cfg.rebuild.commands.push(RebuildStep::new("   ", 0));
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("rebuild.commands[1]"));
    }

    #[test]
    fn zero_timeouts_mean_unbounded() {
        let mut cfg = GititConfig::default();
        cfg.git.local_commands_timeout = 0;
        assert_eq!(cfg.git.local_timeout(), None);
        assert_eq!(cfg.git.origin_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(RebuildStep::new("make", 0).timeout(), None);
    }

    #[test]
    fn empty_binary_path_resolves_to_git() {
        let mut cfg = GitConfig::default();
        assert_eq!(cfg.binary(), "git");
        cfg.binary_path = "/usr/local/bin/git".to_string();
        assert_eq!(cfg.binary(), "/usr/local/bin/git");
    }
}
