pub mod deploy;
pub mod history;
pub mod init;
pub mod status;
pub mod sweep;

use std::path::PathBuf;

use anyhow::{Context, Result};

use launchpad_core::config::CONFIG_FILE;
use launchpad_core::DeployConfig;

/// Usage, configuration and lock errors.
pub const EXIT_USAGE: u8 = 1;

/// Config path to use: explicit flag, else `./launchpad.yaml` if present,
/// else the per-user config directory.
pub fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("launchpad").join(CONFIG_FILE))
        .filter(|path| path.exists())
        .unwrap_or(local)
}

pub fn load_config(explicit: Option<PathBuf>) -> Result<(PathBuf, DeployConfig)> {
    let path = config_path(explicit);
    let config = DeployConfig::load_at(&path).with_context(|| {
        format!(
            "failed to load {}; run `launchpad init` first",
            path.display()
        )
    })?;
    Ok((path, config))
}
