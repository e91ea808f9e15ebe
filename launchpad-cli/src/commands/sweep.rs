//! `launchpad sweep`: remove release directories left behind by crashed runs.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use launchpad_core::ReleaseStore;
use launchpad_deploy::DeployLock;

#[derive(Args, Debug)]
pub struct SweepArgs {}

impl SweepArgs {
    pub fn run(self, config: Option<PathBuf>) -> Result<()> {
        let (_, config) = super::load_config(config)?;
        let _lock = DeployLock::acquire(&config.root).context("cannot sweep")?;

        let removed = ReleaseStore::new(&config.root)
            .sweep()
            .context("sweep failed")?;
        if removed.is_empty() {
            println!("Nothing to sweep.");
            return Ok(());
        }
        for id in &removed {
            println!("✓ removed release {id}");
        }
        println!("{} release(s) removed", removed.len());
        Ok(())
    }
}
