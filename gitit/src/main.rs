//! Git-polling rebuild daemon.
//!
//! Watches the checked-out branch of a working copy, pulls upstream changes
//! and runs the configured rebuild commands after every update.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gitit::exit_codes;
use gitit::io::config::DEFAULT_CONFIG_FILE;
use gitit::logging;
use gitit::startup::{self, StartupMode};

#[derive(Parser)]
#[command(
    name = "gitit",
    version,
    about = "Poll a git branch and rebuild when its upstream changes"
)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default configuration file and exit.
    GenerateConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the rebuild commands once and exit.
    DryRun,
    /// Poll the branch until SIGINT/SIGTERM (the default).
    Watch,
}

impl Cli {
    fn mode(&self) -> StartupMode {
        match self.command {
            Some(Command::GenerateConfig { force }) => StartupMode::GenerateConfig { force },
            Some(Command::DryRun) => StartupMode::DryRun,
            Some(Command::Watch) | None => StartupMode::Watch,
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILURE);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    startup::run(cli.mode(), &cli.config)
}
