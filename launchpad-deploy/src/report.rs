//! What a deploy run did, for the operator and for run history.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use launchpad_core::{BuildAttempt, ReleaseId, SourceRef, SwapResource};

/// Which update path brought the release up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdatePath {
    Partial,
    Full,
}

impl fmt::Display for UpdatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatePath::Partial => f.write_str("partial"),
            UpdatePath::Full => f.write_str("full"),
        }
    }
}

/// Final result of a run. Each variant maps to a distinct exit code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Outcome {
    /// The new release is healthy and the active pointer names it.
    /// `cleanup_error` is set when the previous release directory survived.
    Promoted {
        release: ReleaseId,
        path: UpdatePath,
        previous: Option<ReleaseId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cleanup_error: Option<String>,
    },
    /// Healthy, but the pointer could not be updated. The new services are
    /// running while the pointer still names the old release.
    PromotionFailed { release: ReleaseId, error: String },
    /// Nothing was changed.
    StageFailed { error: String },
    /// Both build attempts failed; the active release kept serving.
    BuildFailed { release: ReleaseId, error: String },
    /// The new release never became healthy; the previous one is back.
    RolledBack {
        failed: ReleaseId,
        restored: ReleaseId,
        reason: String,
    },
    /// Rollback was impossible or did not restore a healthy service.
    Fatal {
        release: Option<ReleaseId>,
        error: String,
    },
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Promoted { cleanup_error: None, .. } => 0,
            Outcome::Promoted { cleanup_error: Some(_), .. } => 7,
            Outcome::StageFailed { .. } => 2,
            Outcome::BuildFailed { .. } => 3,
            Outcome::RolledBack { .. } => 4,
            Outcome::Fatal { .. } => 5,
            Outcome::PromotionFailed { .. } => 6,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Promoted { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Promoted { .. } => "promoted",
            Outcome::PromotionFailed { .. } => "promotion-failed",
            Outcome::StageFailed { .. } => "stage-failed",
            Outcome::BuildFailed { .. } => "build-failed",
            Outcome::RolledBack { .. } => "rolled-back",
            Outcome::Fatal { .. } => "fatal",
        }
    }

    /// The release this run created, if staging got that far.
    pub fn release(&self) -> Option<ReleaseId> {
        match self {
            Outcome::Promoted { release, .. }
            | Outcome::PromotionFailed { release, .. }
            | Outcome::BuildFailed { release, .. } => Some(*release),
            Outcome::RolledBack { failed, .. } => Some(*failed),
            Outcome::Fatal { release, .. } => *release,
            Outcome::StageFailed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Promoted { cleanup_error, .. } => cleanup_error.as_deref(),
            Outcome::PromotionFailed { error, .. }
            | Outcome::StageFailed { error }
            | Outcome::BuildFailed { error, .. }
            | Outcome::Fatal { error, .. } => Some(error),
            Outcome::RolledBack { reason, .. } => Some(reason),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Promoted {
                release,
                path,
                cleanup_error,
                ..
            } => {
                write!(f, "release {release} promoted ({path} update)")?;
                match cleanup_error {
                    Some(err) => write!(f, "; {err}"),
                    None => Ok(()),
                }
            }
            Outcome::PromotionFailed { release, error } => {
                write!(f, "release {release} is serving but promotion failed: {error}")
            }
            Outcome::StageFailed { error } => write!(f, "staging failed: {error}"),
            Outcome::BuildFailed { release, error } => {
                write!(f, "build of release {release} failed: {error}")
            }
            Outcome::RolledBack {
                failed,
                restored,
                reason,
            } => write!(f, "release {failed} failed ({reason}); rolled back to {restored}"),
            Outcome::Fatal { error, .. } => write!(f, "fatal: {error}"),
        }
    }
}

/// One state change of the deploy state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub at: DateTime<Utc>,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployReport {
    pub source_ref: SourceRef,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub build_attempts: Vec<BuildAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap: Option<SwapResource>,
    /// Tail of service logs, captured when the new release failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl DeployReport {
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }

    /// State names in visiting order, starting state included.
    pub fn states(&self) -> Vec<&str> {
        let mut states: Vec<&str> = self.transitions.first().map(|t| t.from.as_str()).into_iter().collect();
        states.extend(self.transitions.iter().map(|t| t.to.as_str()));
        states
    }
}
