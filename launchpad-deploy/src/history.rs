//! Run history: one JSON object per finished deploy in `<root>/history.jsonl`.
//!
//! The file is rotated by size before each append:
//!   history.jsonl → history.jsonl.1 → … → history.jsonl.5

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use launchpad_core::paths::history_path;
use launchpad_core::{ReleaseId, SourceRef};

use crate::error::{io_err, DeployError};
use crate::report::{DeployReport, Outcome, UpdatePath};

/// Rotate once the live file reaches this size (10 MiB).
pub const MAX_HISTORY_BYTES: u64 = 10 * 1024 * 1024;

/// Rotated copies kept next to the live file.
pub const MAX_ROTATED_FILES: usize = 5;

/// Summary of one run as stored in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source_ref: SourceRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<ReleaseId>,
    pub outcome: String,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<UpdatePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub warnings: usize,
}

impl From<&DeployReport> for HistoryEntry {
    fn from(report: &DeployReport) -> Self {
        let path = match &report.outcome {
            Outcome::Promoted { path, .. } => Some(*path),
            _ => None,
        };
        Self {
            started_at: report.started_at,
            finished_at: report.finished_at,
            source_ref: report.source_ref.clone(),
            release: report.outcome.release(),
            outcome: report.outcome.kind().to_string(),
            exit_code: report.exit_code(),
            path,
            error: report.outcome.error().map(str::to_string),
            warnings: report.warnings.len(),
        }
    }
}

/// Append `entry` to the history under `root`, rotating first if needed.
pub fn append(root: &Path, entry: &HistoryEntry) -> Result<(), DeployError> {
    let path = history_path(root);
    match rotate_if_needed(&path, MAX_HISTORY_BYTES, MAX_ROTATED_FILES) {
        Ok(true) => tracing::info!(path = %path.display(), "run history rotated"),
        Ok(false) => {}
        Err(err) => tracing::warn!(path = %path.display(), error = %err, "history rotation failed"),
    }

    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| io_err(&path, e))?;
    file.write_all(line.as_bytes()).map_err(|e| io_err(&path, e))
}

/// The last `n` entries of the live history file, oldest first.
///
/// Lines that do not parse are skipped with a warning.
pub fn tail(root: &Path, n: usize) -> Result<Vec<HistoryEntry>, DeployError> {
    let path = history_path(root);
    let file = match fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(io_err(&path, e)),
    };

    let mut ring: VecDeque<HistoryEntry> = VecDeque::with_capacity(n);
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| io_err(&path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryEntry>(&line) {
            Ok(entry) => {
                if n == 0 {
                    continue;
                }
                if ring.len() == n {
                    ring.pop_front();
                }
                ring.push_back(entry);
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), line = lineno + 1, error = %err, "skipping malformed history line")
            }
        }
    }
    Ok(ring.into())
}

/// Rotate `path` if it is at least `max_bytes` long.
///
/// Returns `true` if rotation happened. A missing file is not an error.
pub fn rotate_if_needed(path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes {
        return Ok(false);
    }

    let oldest = numbered_path(path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..max_files).rev() {
        let src = numbered_path(path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(path, n + 1))?;
        }
    }
    fs::rename(path, numbered_path(path, 1))?;
    Ok(true)
}

fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(launchpad_core::paths::HISTORY_FILE);
    base.with_file_name(format!("{name}.{n}"))
}
