//! Storage layout under the release root.
//!
//! ```text
//! <root>/
//!   releases/<id>/release.yaml
//!   releases/<id>/app/
//!   current -> releases/<id>
//!   deploy.lock
//!   history.jsonl
//! ```

use std::path::{Path, PathBuf};

use crate::types::ReleaseId;

pub const RELEASES_DIR: &str = "releases";
pub const APP_DIR: &str = "app";
pub const MANIFEST_FILE: &str = "release.yaml";
pub const ACTIVE_POINTER: &str = "current";
pub const LOCK_FILE: &str = "deploy.lock";
pub const HISTORY_FILE: &str = "history.jsonl";

pub fn releases_root(root: &Path) -> PathBuf {
    root.join(RELEASES_DIR)
}

pub fn release_dir(root: &Path, id: ReleaseId) -> PathBuf {
    releases_root(root).join(id.to_string())
}

pub fn manifest_path(release_dir: &Path) -> PathBuf {
    release_dir.join(MANIFEST_FILE)
}

pub fn active_pointer_path(root: &Path) -> PathBuf {
    root.join(ACTIVE_POINTER)
}

pub fn lock_path(root: &Path) -> PathBuf {
    root.join(LOCK_FILE)
}

pub fn history_path(root: &Path) -> PathBuf {
    root.join(HISTORY_FILE)
}
