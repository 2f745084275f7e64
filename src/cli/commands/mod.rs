//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific
//! modules. Every knob beyond verbosity arrives through the environment, so
//! subcommands stay bare.

mod once_cmd;
mod run_cmd;
mod status_cmd;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "gigwatch")]
#[command(about = "Job-board watcher: logs in, captures new postings, stores them with a TTL")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduled daemon: health endpoint plus hour-parity capture windows
    Run,

    /// Run one capture cycle and exit (no scheduler, no health endpoint)
    Once,

    /// Show the effective configuration and the store record count
    Status,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Run => run_cmd::cmd_run(config).await,
        Commands::Once => once_cmd::cmd_once(config).await,
        Commands::Status => status_cmd::cmd_status(config).await,
    }
}
