//! `launchpad deploy [--ref <ref>] [--json]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use launchpad_core::{ActivePointer, ReleaseStore, SourceRef};
use launchpad_deploy::{
    history, Components, DeployLock, DeployReport, DeploySettings, HistoryEntry, Orchestrator,
    Outcome,
};
use launchpad_host::{
    fetcher_for, ComposeBuilder, ComposeCommand, ComposeController, HealthMonitor, HttpProbe,
    ProcHost, SwapGuard, SystemClock, SystemRunner,
};

/// Stage, build, verify and promote a new release.
#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Branch or tag to deploy (default: `source.default_ref`).
    #[arg(long = "ref", short = 'r', value_name = "REF")]
    pub source_ref: Option<String>,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

impl DeployArgs {
    /// Returns the process exit code for the run's outcome.
    pub fn run(self, config: Option<PathBuf>) -> Result<u8> {
        let (_, config) = super::load_config(config)?;
        let _lock = DeployLock::acquire(&config.root)
            .with_context(|| format!("cannot deploy {}", config.project))?;

        let source_ref = SourceRef::from(
            self.source_ref
                .unwrap_or_else(|| config.source.default_ref.clone()),
        );

        let runner = SystemRunner;
        let host = ProcHost::new();
        let mut guard = SwapGuard::new(&runner, &host, &config.resources.swap_path);
        let command = ComposeCommand::from_config(&config);
        let builder = ComposeBuilder::new(&runner, command.clone());
        let controller = ComposeController::new(&runner, command, config.build.timeout());
        let health = HealthMonitor::new(HttpProbe, SystemClock::new(), config.health.request_timeout());
        let fetcher = fetcher_for(&config.source_spec(), &runner);

        let store = ReleaseStore::new(&config.root);
        let mut pointer = ActivePointer::open(&config.root);
        let components = Components {
            guard: &mut guard,
            fetcher: fetcher.as_ref(),
            builder: &builder,
            controller: &controller,
            health: &health,
        };
        let report = Orchestrator::new(&store, DeploySettings::from_config(&config), components)
            .run(source_ref, &mut pointer);

        if let Err(err) = history::append(&config.root, &HistoryEntry::from(&report)) {
            tracing::warn!(error = %err, "failed to record run history");
        }

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize deploy report")?
            );
        } else {
            print_report(&report);
        }

        // Exit codes are 0..=6.
        Ok(u8::try_from(report.exit_code()).unwrap_or(super::EXIT_USAGE))
    }
}

fn print_report(report: &DeployReport) {
    for transition in &report.transitions {
        println!(
            "  {} {} {}",
            transition.at.format("%H:%M:%S").to_string().bright_black(),
            transition.from,
            format!("→ {}", transition.to).bold(),
        );
    }
    for attempt in &report.build_attempts {
        let mark = if attempt.succeeded {
            "ok".green()
        } else {
            "failed".red()
        };
        println!(
            "  build attempt {} ({}): {mark}",
            attempt.attempt_number, attempt.cache_mode
        );
    }
    for warning in &report.warnings {
        println!("{} {warning}", "warning:".yellow().bold());
    }

    let headline = report.outcome.to_string();
    match &report.outcome {
        Outcome::Promoted { cleanup_error: None, .. } => println!("{} {headline}", "✓".green().bold()),
        Outcome::Promoted { .. } | Outcome::RolledBack { .. } | Outcome::PromotionFailed { .. } => {
            println!("{} {headline}", "!".yellow().bold())
        }
        _ => println!("{} {headline}", "✗".red().bold()),
    }

    if let Some(logs) = report.logs.as_deref().filter(|l| !l.trim().is_empty()) {
        println!("{}", "── service logs ──".bright_black());
        print!("{logs}");
        if !logs.ends_with('\n') {
            println!();
        }
    }
}
