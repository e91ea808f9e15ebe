//! `launchpad status`: active release and stored releases.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use launchpad_core::{Release, ReleaseId, ReleaseStatus, ReleaseStore};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatusJson {
    project: String,
    root: PathBuf,
    active: Option<ReleaseId>,
    releases: Vec<Release>,
}

#[derive(Tabled)]
struct ReleaseRow {
    #[tabled(rename = "")]
    marker: String,
    #[tabled(rename = "release")]
    id: String,
    #[tabled(rename = "ref")]
    source_ref: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "builds")]
    attempts: usize,
    #[tabled(rename = "updated")]
    updated: String,
}

impl StatusArgs {
    pub fn run(self, config: Option<PathBuf>) -> Result<()> {
        let (_, config) = super::load_config(config)?;
        let store = ReleaseStore::new(&config.root);
        let active = store.active().context("failed to read active pointer")?;
        let releases = store.list().context("failed to list releases")?;

        if self.json {
            let payload = StatusJson {
                project: config.project,
                root: config.root,
                active,
                releases,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        println!(
            "launchpad v{} | {} | {} release(s) | active: {}",
            env!("CARGO_PKG_VERSION"),
            config.project.bold(),
            releases.len(),
            active
                .map(|id| id.to_string().green().to_string())
                .unwrap_or_else(|| "none".bright_black().to_string()),
        );
        if releases.is_empty() {
            println!("No releases under {}.", config.root.display());
            return Ok(());
        }

        let rows: Vec<ReleaseRow> = releases
            .into_iter()
            .map(|release| ReleaseRow {
                marker: if Some(release.id) == active { "*".into() } else { String::new() },
                id: release.id.to_string(),
                source_ref: release.source_ref.to_string(),
                status: status_label(release.status),
                attempts: release.attempts.len(),
                updated: release.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn status_label(status: ReleaseStatus) -> String {
    let label = status.to_string().to_uppercase();
    match status {
        ReleaseStatus::Promoted | ReleaseStatus::Healthy => label.green().bold().to_string(),
        ReleaseStatus::Staged | ReleaseStatus::Building => label.yellow().to_string(),
        ReleaseStatus::Failed => label.red().bold().to_string(),
        ReleaseStatus::Discarded => label.bright_black().to_string(),
    }
}
