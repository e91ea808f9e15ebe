//! launchpad: single-host release orchestrator.
//!
//! # Usage
//!
//! ```text
//! launchpad init [--project <name>] [--root <path>] [--force]
//! launchpad deploy [--ref <ref>] [--json]
//! launchpad status [--json]
//! launchpad sweep
//! launchpad history [--lines <n>] [--json]
//! ```
//!
//! Every command accepts `--config <path>` (default: `./launchpad.yaml`,
//! then `~/.config/launchpad/launchpad.yaml`) and `--log-json`.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

use commands::{
    deploy::DeployArgs, history::HistoryArgs, init::InitArgs, status::StatusArgs,
    sweep::SweepArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "launchpad",
    version,
    about = "Build, verify and promote releases of a compose service on one host",
    long_about = None,
)]
struct Cli {
    /// Path to launchpad.yaml.
    #[arg(long, short = 'c', global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter launchpad.yaml.
    Init(InitArgs),

    /// Stage, build, verify and promote a new release.
    Deploy(DeployArgs),

    /// Show the active release and all stored releases.
    Status(StatusArgs),

    /// Delete release directories that are not active.
    Sweep(SweepArgs),

    /// Show recent deploy runs.
    History(HistoryArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(commands::EXIT_USAGE)
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let config = cli.config;
    match cli.command {
        Commands::Init(args) => args.run(config).map(|()| 0),
        Commands::Deploy(args) => args.run(config),
        Commands::Status(args) => args.run(config).map(|()| 0),
        Commands::Sweep(args) => args.run(config).map(|()| 0),
        Commands::History(args) => args.run(config).map(|()| 0),
    }
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
