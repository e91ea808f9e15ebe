//! Domain types for releases, build attempts, swap resources and probes.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Persisted types are serializable via serde + serde_yaml.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Timestamp-derived release identifier: `YYYYMMDDHHMMSSmmm` in UTC.
///
/// Ordering is numeric, which matches chronological order for generated ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReleaseId(pub u64);

impl ReleaseId {
    /// Number of digits in the textual form.
    pub const WIDTH: usize = 17;

    /// Derive an id from a wall-clock instant.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let text = at.format("%Y%m%d%H%M%S%3f").to_string();
        // The format only emits ASCII digits.
        Self(text.parse().unwrap_or_default())
    }

    /// The smallest id strictly greater than `self`.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.0, width = Self::WIDTH)
    }
}

impl FromStr for ReleaseId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::WIDTH || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid release id '{s}': expected {} digits", Self::WIDTH));
        }
        s.parse::<u64>().map(Self).map_err(|e| e.to_string())
    }
}

impl TryFrom<String> for ReleaseId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ReleaseId> for String {
    fn from(id: ReleaseId) -> Self {
        id.to_string()
    }
}

/// A branch or tag naming the source snapshot to deploy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef(pub String);

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SourceRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SourceRef {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a release.
///
/// `Promoted` and `Discarded` are terminal. A discarded release has no
/// directory left on disk, so that status is only ever observed in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    #[default]
    Staged,
    Building,
    Healthy,
    Promoted,
    Failed,
    Discarded,
}

impl ReleaseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReleaseStatus::Promoted | ReleaseStatus::Discarded)
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReleaseStatus::Staged => "staged",
            ReleaseStatus::Building => "building",
            ReleaseStatus::Healthy => "healthy",
            ReleaseStatus::Promoted => "promoted",
            ReleaseStatus::Failed => "failed",
            ReleaseStatus::Discarded => "discarded",
        };
        f.write_str(s)
    }
}

/// Build cache mode for a single build attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    Cached,
    NoCache,
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheMode::Cached => write!(f, "cached"),
            CacheMode::NoCache => write!(f, "no-cache"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One build attempt belonging to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildAttempt {
    /// 1-based, strictly increasing within a release.
    pub attempt_number: u32,
    pub cache_mode: CacheMode,
    /// Process exit code; `None` when the build was killed or never started.
    pub exit_status: Option<i32>,
    pub succeeded: bool,
    pub finished_at: DateTime<Utc>,
}

/// A staged release and its exclusively owned directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: ReleaseId,
    pub source_ref: SourceRef,
    pub status: ReleaseStatus,
    /// `<root>/releases/<id>`; never shared with another release.
    pub directory: PathBuf,
    #[serde(default)]
    pub attempts: Vec<BuildAttempt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Release {
    /// Directory holding the staged source tree; build and compose run here.
    pub fn app_dir(&self) -> PathBuf {
        self.directory.join(crate::paths::APP_DIR)
    }
}

/// Where a staged release gets its source tree from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// `git clone --depth 1 --branch <ref> <repository>`.
    Git { repository: String },
    /// Recursive copy of a local directory; the source ref is recorded only.
    Directory { path: PathBuf },
    /// Leave the release's `app/` directory empty.
    Empty,
}

/// A swap area the Resource Guard made available for the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapResource {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Only files created by this run are deleted at the end of it.
    pub created_by_this_run: bool,
    /// An existing swap file this run switched on; it is switched off again
    /// but never deleted.
    #[serde(default)]
    pub activated_by_this_run: bool,
}

/// Result of a single health probe. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub reachable: bool,
    pub status_code: Option<u16>,
    pub elapsed: Duration,
}

impl ProbeResult {
    pub fn unreachable(elapsed: Duration) -> Self {
        Self {
            reachable: false,
            status_code: None,
            elapsed,
        }
    }

    pub fn responded(status_code: u16, elapsed: Duration) -> Self {
        Self {
            reachable: true,
            status_code: Some(status_code),
            elapsed,
        }
    }

    /// Only a reachable endpoint answering 2xx counts as healthy.
    pub fn is_healthy(&self) -> bool {
        self.reachable && matches!(self.status_code, Some(200..=299))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
