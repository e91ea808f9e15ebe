//! `launchpad history [--lines N]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use launchpad_deploy::{history, HistoryEntry};

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Number of most recent runs to show.
    #[arg(long, short = 'n', default_value_t = 20)]
    pub lines: usize,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "finished")]
    finished: String,
    #[tabled(rename = "ref")]
    source_ref: String,
    #[tabled(rename = "release")]
    release: String,
    #[tabled(rename = "outcome")]
    outcome: String,
    #[tabled(rename = "exit")]
    exit_code: i32,
    #[tabled(rename = "duration")]
    duration: String,
}

impl HistoryArgs {
    pub fn run(self, config: Option<PathBuf>) -> Result<()> {
        let (_, config) = super::load_config(config)?;
        let entries = history::tail(&config.root, self.lines).context("failed to read run history")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&entries).context("failed to serialize history")?
            );
            return Ok(());
        }
        if entries.is_empty() {
            println!("No deploys recorded yet.");
            return Ok(());
        }

        let rows: Vec<HistoryRow> = entries.iter().map(row).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn row(entry: &HistoryEntry) -> HistoryRow {
    let secs = (entry.finished_at - entry.started_at).num_seconds().max(0);
    let outcome = match entry.exit_code {
        0 => entry.outcome.green().to_string(),
        4 | 6 | 7 => entry.outcome.yellow().to_string(),
        _ => entry.outcome.red().to_string(),
    };
    HistoryRow {
        finished: entry.finished_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        source_ref: entry.source_ref.to_string(),
        release: entry
            .release
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".into()),
        outcome,
        exit_code: entry.exit_code,
        duration: format!("{}m{:02}s", secs / 60, secs % 60),
    }
}
