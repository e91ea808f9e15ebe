//! Exclusive deploy lock: `<root>/deploy.lock` holding the owner's pid.
//!
//! Only one deploy may stage or promote against a release root at a time.
//! The lock file is created with `create_new` and removed when the guard
//! drops. A lock left behind by a process that no longer exists is reclaimed:
//! the reclaimer first takes `deploy.lock.reclaim` (also `create_new`), checks
//! the holder again under it, and renames its own lock file over the stale
//! one. The lock path never disappears during a reclaim, so a plain acquire
//! cannot slip in, and two reclaimers cannot both win.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use launchpad_core::paths::lock_path;

use crate::error::{io_err, DeployError};

#[derive(Debug)]
pub struct DeployLock {
    path: PathBuf,
}

impl DeployLock {
    pub fn acquire(root: &Path) -> Result<Self, DeployError> {
        fs::create_dir_all(root).map_err(|e| io_err(root, e))?;
        let path = lock_path(root);

        match create(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => reclaim(&path)?,
            Err(e) => return Err(io_err(&path, e)),
        }

        tracing::debug!(path = %path.display(), "deploy lock acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to remove deploy lock");
        }
    }
}

/// Removes the reclaim marker when the reclaim attempt ends.
struct ReclaimGuard {
    path: PathBuf,
}

impl Drop for ReclaimGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Replace a lock held by a dead process with one held by us.
fn reclaim(path: &Path) -> Result<(), DeployError> {
    let locked = || DeployError::Locked {
        path: path.to_path_buf(),
        holder: read_holder(path),
    };
    if !holder_is_dead(path) {
        return Err(locked());
    }

    let marker = reclaim_marker(path);
    let _guard = match create(&marker) {
        Ok(()) => ReclaimGuard { path: marker },
        // Another process is reclaiming right now.
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(locked()),
        Err(e) => return Err(io_err(&marker, e)),
    };

    // Checked again: the lock may have been reclaimed since the first look.
    let Some(stale) = read_holder(path).filter(|pid| !is_alive(*pid)) else {
        return Err(locked());
    };

    let tmp = path.with_extension(format!("lock.{}.tmp", std::process::id()));
    let _ = fs::remove_file(&tmp);
    create(&tmp).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }

    if read_holder(path) != Some(std::process::id()) {
        return Err(locked());
    }
    tracing::warn!(path = %path.display(), pid = stale, "reclaimed stale deploy lock");
    Ok(())
}

fn holder_is_dead(path: &Path) -> bool {
    matches!(read_holder(path), Some(pid) if !is_alive(pid))
}

fn reclaim_marker(path: &Path) -> PathBuf {
    path.with_extension("lock.reclaim")
}

fn create(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    writeln!(file, "{}", std::process::id())
}

/// Pid recorded in the lock file; `None` if unreadable or empty.
pub fn read_holder(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(target_os = "linux")]
fn is_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without procfs there is no cheap liveness check; treat every holder as live.
#[cfg(not(target_os = "linux"))]
fn is_alive(_pid: u32) -> bool {
    true
}
