//! `launchpad init [--project <name>] [--root <path>] [--force]`

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use launchpad_core::config::{starter_config, CONFIG_FILE};

/// Write a starter launchpad.yaml.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Compose project name (default: name of the current directory).
    #[arg(long, short = 'p')]
    pub project: Option<String>,

    /// Release-storage root.
    #[arg(long, default_value = "/srv/launchpad")]
    pub root: PathBuf,

    /// Overwrite an existing config file.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self, config: Option<PathBuf>) -> Result<()> {
        let path = config.unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
        if path.exists() && !self.force {
            bail!("{} already exists (use --force to overwrite)", path.display());
        }

        let project = match self.project {
            Some(project) => project,
            None => std::env::current_dir()
                .ok()
                .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
                .context("cannot derive a project name; pass --project")?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        std::fs::write(&path, starter_config(&project, &self.root))
            .with_context(|| format!("cannot write {}", path.display()))?;

        println!("✓ Wrote {} for project '{project}'", path.display());
        println!("  Edit source.repository and health.port, then run `launchpad deploy`.");
        Ok(())
    }
}
