//! Populating a staged release's `app/` directory.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use launchpad_core::{Release, SourceSpec, StoreError};

use crate::runner::{CommandRunner, CommandSpec};

/// Fills `release.app_dir()` with the source tree for `release.source_ref`.
pub trait SourceFetcher {
    fn fetch(&self, release: &Release) -> Result<(), StoreError>;
}

/// Shallow clone of one branch or tag.
pub struct GitSource<'a> {
    runner: &'a dyn CommandRunner,
    repository: String,
}

impl<'a> GitSource<'a> {
    pub fn new(runner: &'a dyn CommandRunner, repository: impl Into<String>) -> Self {
        Self {
            runner,
            repository: repository.into(),
        }
    }
}

impl SourceFetcher for GitSource<'_> {
    fn fetch(&self, release: &Release) -> Result<(), StoreError> {
        let app_dir = release.app_dir();
        let spec = CommandSpec::new("git")
            .args(["clone", "--depth", "1", "--branch"])
            .arg(release.source_ref.0.as_str())
            .arg(self.repository.as_str())
            .arg(app_dir.display().to_string());

        tracing::info!(release = %release.id, repository = %self.repository, source_ref = %release.source_ref, "cloning source");
        self.runner
            .run(&spec)
            .map(|_| ())
            .map_err(|err| StoreError::Populate {
                id: release.id,
                reason: err.to_string(),
            })
    }
}

/// Recursive copy of a local checkout. Version-control metadata is skipped.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    path: PathBuf,
}

impl DirectorySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SourceFetcher for DirectorySource {
    fn fetch(&self, release: &Release) -> Result<(), StoreError> {
        tracing::info!(release = %release.id, from = %self.path.display(), "copying source");
        copy_tree(&self.path, &release.app_dir()).map_err(|reason| StoreError::Populate {
            id: release.id,
            reason,
        })
    }
}

/// Leaves `app/` as staged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSource;

impl SourceFetcher for NoSource {
    fn fetch(&self, _release: &Release) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Pick the fetcher matching a configured [`SourceSpec`].
pub fn fetcher_for<'a>(spec: &SourceSpec, runner: &'a dyn CommandRunner) -> Box<dyn SourceFetcher + 'a> {
    match spec {
        SourceSpec::Git { repository } => Box::new(GitSource::new(runner, repository.clone())),
        SourceSpec::Directory { path } => Box::new(DirectorySource::new(path.clone())),
        SourceSpec::Empty => Box::new(NoSource),
    }
}

const SKIPPED: &[&str] = &[".git"];

fn copy_tree(from: &Path, to: &Path) -> Result<(), String> {
    if !from.is_dir() {
        return Err(format!("source directory {} does not exist", from.display()));
    }

    let walker = WalkDir::new(from)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !SKIPPED
                    .iter()
                    .any(|skip| e.file_name() == std::ffi::OsStr::new(skip))
        });

    for entry in walker {
        let entry = entry.map_err(|e| e.to_string())?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| e.to_string())?;
        let target = to.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| format!("{}: {e}", target.display()))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| format!("{}: {e}", target.display()))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> Result<(), String> {
    let link = fs::read_link(from).map_err(|e| format!("{}: {e}", from.display()))?;
    std::os::unix::fs::symlink(&link, to).map_err(|e| format!("{}: {e}", to.display()))
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> Result<(), String> {
    fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| format!("{}: {e}", to.display()))
}
