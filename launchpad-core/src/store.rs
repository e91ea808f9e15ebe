//! Release store and active pointer.
//!
//! # Storage layout
//!
//! ```text
//! <root>/
//!   releases/
//!     <id>/
//!       release.yaml   (manifest, written atomically)
//!       app/           (staged source tree)
//!   current -> releases/<id>
//! ```
//!
//! The store owns release directories. The [`ActivePointer`] is a separate
//! write capability: whoever holds the `&mut ActivePointer` is the single
//! writer, and every update is a rename of a freshly created link over the
//! old one, so readers observe either the old or the new target.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{io_err, StoreError};
use crate::paths::{
    active_pointer_path, manifest_path, release_dir, releases_root, APP_DIR, RELEASES_DIR,
};
use crate::types::{BuildAttempt, Release, ReleaseId, ReleaseStatus, SourceRef};

/// How many id collisions `stage` tolerates before giving up.
const STAGE_ID_RETRIES: u32 = 16;

// ---------------------------------------------------------------------------
// 1. Active pointer
// ---------------------------------------------------------------------------

/// The single reference naming the currently promoted release.
#[derive(Debug)]
pub struct ActivePointer {
    root: PathBuf,
}

impl ActivePointer {
    /// Take the write capability for the pointer under `root`.
    pub fn open(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn path(&self) -> PathBuf {
        active_pointer_path(&self.root)
    }

    /// The release the pointer currently names, or `None` if nothing was
    /// ever promoted.
    pub fn read(&self) -> Result<Option<ReleaseId>, StoreError> {
        read_pointer(&self.root)
    }

    /// Atomically point at `id`.
    pub fn swap(&mut self, id: ReleaseId) -> Result<(), StoreError> {
        let link = self.path();
        let tmp = self.root.join(format!(".{}.tmp", crate::paths::ACTIVE_POINTER));
        match std::fs::remove_file(&tmp) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&tmp, e)),
        }
        write_pointer(&tmp, id)?;
        if let Err(e) = std::fs::rename(&tmp, &link) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&link, e));
        }
        tracing::info!(release = %id, pointer = %link.display(), "active pointer updated");
        Ok(())
    }
}

#[cfg(unix)]
fn write_pointer(tmp: &Path, id: ReleaseId) -> Result<(), StoreError> {
    let target = Path::new(RELEASES_DIR).join(id.to_string());
    std::os::unix::fs::symlink(&target, tmp).map_err(|e| io_err(tmp, e))
}

#[cfg(not(unix))]
fn write_pointer(tmp: &Path, id: ReleaseId) -> Result<(), StoreError> {
    std::fs::write(tmp, id.to_string()).map_err(|e| io_err(tmp, e))
}

#[cfg(unix)]
fn read_pointer(root: &Path) -> Result<Option<ReleaseId>, StoreError> {
    let link = active_pointer_path(root);
    let target = match std::fs::read_link(&link) {
        Ok(target) => target,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) if e.kind() == ErrorKind::InvalidInput => {
            return Err(StoreError::InvalidPointer { path: link })
        }
        Err(e) => return Err(io_err(&link, e)),
    };
    target
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.parse::<ReleaseId>().ok())
        .map(Some)
        .ok_or(StoreError::InvalidPointer { path: link })
}

#[cfg(not(unix))]
fn read_pointer(root: &Path) -> Result<Option<ReleaseId>, StoreError> {
    let link = active_pointer_path(root);
    let contents = match std::fs::read_to_string(&link) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(&link, e)),
    };
    contents
        .trim()
        .parse::<ReleaseId>()
        .map(Some)
        .map_err(|_| StoreError::InvalidPointer { path: link })
}

// ---------------------------------------------------------------------------
// 2. Release store
// ---------------------------------------------------------------------------

/// What `promote` did besides swapping the pointer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Promotion {
    pub previous: Option<ReleaseId>,
    /// `true` once the previous release directory is gone.
    pub previous_removed: bool,
    /// Why the previous release directory is still on disk, if it is.
    pub cleanup_error: Option<String>,
    /// Non-fatal bookkeeping problems; the new release is serving regardless.
    pub warnings: Vec<String>,
}

/// Immutable, timestamp-identified release directories under one root.
#[derive(Debug, Clone)]
pub struct ReleaseStore {
    root: PathBuf,
}

impl ReleaseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read-only view of the active pointer.
    pub fn active(&self) -> Result<Option<ReleaseId>, StoreError> {
        read_pointer(&self.root)
    }

    /// Create a fresh release directory with a new, strictly increasing id.
    ///
    /// Fails with [`StoreError::Stage`] if the release root is unwritable;
    /// nothing outside the new directory is touched.
    pub fn stage(&self, source_ref: SourceRef) -> Result<Release, StoreError> {
        let releases = releases_root(&self.root);
        std::fs::create_dir_all(&releases).map_err(|source| StoreError::Stage {
            path: releases.clone(),
            source,
        })?;

        let mut id = ReleaseId::from_datetime(Utc::now());
        if let Some(latest) = self.latest_id()? {
            if id <= latest {
                id = latest.next();
            }
        }

        let mut attempts = 0;
        let directory = loop {
            let dir = release_dir(&self.root, id);
            match std::fs::create_dir(&dir) {
                Ok(()) => break dir,
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempts < STAGE_ID_RETRIES => {
                    attempts += 1;
                    id = id.next();
                }
                Err(source) => return Err(StoreError::Stage { path: dir, source }),
            }
        };

        let app = directory.join(APP_DIR);
        if let Err(source) = std::fs::create_dir(&app) {
            let _ = std::fs::remove_dir_all(&directory);
            return Err(StoreError::Stage { path: app, source });
        }

        let now = Utc::now();
        let release = Release {
            id,
            source_ref,
            status: ReleaseStatus::Staged,
            directory,
            attempts: vec![],
            created_at: now,
            updated_at: now,
        };
        if let Err(err) = self.save(&release) {
            let _ = std::fs::remove_dir_all(&release.directory);
            return Err(match err {
                StoreError::Io { path, source } => StoreError::Stage { path, source },
                other => other,
            });
        }

        tracing::info!(release = %release.id, source_ref = %release.source_ref, "release staged");
        Ok(release)
    }

    /// Load the manifest of release `id`.
    pub fn load(&self, id: ReleaseId) -> Result<Release, StoreError> {
        let dir = release_dir(&self.root, id);
        let path = manifest_path(&dir);
        if !path.exists() {
            return Err(StoreError::ReleaseNotFound { id, path: dir });
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        serde_yaml::from_str(&contents).map_err(|source| StoreError::Parse { path, source })
    }

    /// All releases with a readable manifest, sorted by id.
    ///
    /// Directories whose manifest is missing or corrupt are skipped with a
    /// warning; `sweep` still removes them.
    pub fn list(&self) -> Result<Vec<Release>, StoreError> {
        let mut releases = Vec::new();
        for id in self.release_ids()? {
            match self.load(id) {
                Ok(release) => releases.push(release),
                Err(err) => tracing::warn!(release = %id, error = %err, "skipping unreadable release"),
            }
        }
        Ok(releases)
    }

    /// Atomically write the release manifest: `.tmp` sibling then `rename`.
    pub fn save(&self, release: &Release) -> Result<(), StoreError> {
        let path = manifest_path(&release.directory);
        let tmp = path.with_extension("yaml.tmp");
        let yaml = serde_yaml::to_string(release)?;
        std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&path, e));
        }
        Ok(())
    }

    /// Persist a status transition.
    pub fn set_status(&self, release: &mut Release, status: ReleaseStatus) -> Result<(), StoreError> {
        release.status = status;
        release.updated_at = Utc::now();
        self.save(release)
    }

    /// Append a finished build attempt to the manifest.
    pub fn record_attempt(
        &self,
        release: &mut Release,
        attempt: BuildAttempt,
    ) -> Result<(), StoreError> {
        release.attempts.push(attempt);
        release.updated_at = Utc::now();
        self.save(release)
    }

    /// Point the active pointer at `release`, then delete the previously
    /// active release directory.
    ///
    /// The previous directory is only touched after the pointer swap
    /// succeeded. A crash in between leaves an orphan for [`Self::sweep`].
    pub fn promote(
        &self,
        pointer: &mut ActivePointer,
        release: &mut Release,
    ) -> Result<Promotion, StoreError> {
        let previous = pointer.read()?;
        pointer.swap(release.id)?;

        let mut promotion = Promotion {
            previous,
            ..Promotion::default()
        };

        if let Err(err) = self.set_status(release, ReleaseStatus::Promoted) {
            tracing::warn!(release = %release.id, error = %err, "failed to record promoted status");
            promotion.warnings.push(format!("manifest update failed: {err}"));
        }

        match previous {
            Some(prev) if prev != release.id => {
                let dir = release_dir(&self.root, prev);
                match remove_dir_if_present(&dir) {
                    Ok(()) => {
                        promotion.previous_removed = true;
                        tracing::info!(release = %prev, "previous release removed");
                    }
                    Err(err) => {
                        tracing::warn!(release = %prev, error = %err, "failed to remove previous release");
                        promotion.cleanup_error = Some(format!("previous release {prev} not removed: {err}"));
                    }
                }
            }
            _ => {}
        }

        Ok(promotion)
    }

    /// Delete the release directory. An already-absent directory is not an
    /// error, so discarding twice is fine.
    pub fn discard(&self, release: &mut Release) -> Result<(), StoreError> {
        remove_dir_if_present(&release.directory)?;
        release.status = ReleaseStatus::Discarded;
        release.updated_at = Utc::now();
        tracing::info!(release = %release.id, "release discarded");
        Ok(())
    }

    /// Remove every release directory except the active one and the newest
    /// healthy release newer than it.
    ///
    /// A healthy release newer than the active one is what a failed pointer
    /// update leaves behind: its services are the ones running. Returns the
    /// ids removed. Used before staging and by `launchpad sweep` to clean up
    /// after runs that crashed mid-way.
    pub fn sweep(&self) -> Result<Vec<ReleaseId>, StoreError> {
        let active = self.active()?;
        let ids = self.release_ids()?;
        let serving = ids
            .iter()
            .rev()
            .filter(|id| active.map_or(true, |a| **id > a))
            .find(|id| matches!(self.load(**id), Ok(r) if r.status == ReleaseStatus::Healthy))
            .copied();
        if let Some(id) = serving {
            tracing::warn!(release = %id, "keeping healthy release that was never promoted");
        }

        let mut removed = Vec::new();
        for id in ids {
            if Some(id) == active || Some(id) == serving {
                continue;
            }
            remove_dir_if_present(&release_dir(&self.root, id))?;
            tracing::info!(release = %id, "orphaned release removed");
            removed.push(id);
        }
        Ok(removed)
    }

    fn latest_id(&self) -> Result<Option<ReleaseId>, StoreError> {
        Ok(self.release_ids()?.into_iter().max())
    }

    /// Ids of every directory under `releases/` whose name is a release id.
    fn release_ids(&self) -> Result<Vec<ReleaseId>, StoreError> {
        let dir = releases_root(&self.root);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut ids: Vec<ReleaseId> = std::fs::read_dir(&dir)
            .map_err(|e| io_err(&dir, e))?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse().ok()))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

fn remove_dir_if_present(dir: &Path) -> Result<(), StoreError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(dir, e)),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
