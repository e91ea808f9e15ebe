//! Error types for launchpad-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ReleaseId;

/// Errors from the release store and the active pointer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The release root (or its `releases/` directory) cannot be written.
    #[error("cannot stage release under {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Copying or checking out the source snapshot into the release failed.
    #[error("failed to populate release {id}: {reason}")]
    Populate { id: ReleaseId, reason: String },

    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (manifest write path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Manifest parse error on load.
    #[error("failed to parse release manifest at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("release {id} not found under {path}")]
    ReleaseNotFound { id: ReleaseId, path: PathBuf },

    /// The active pointer exists but does not name a release directory.
    #[error("active pointer at {path} is not a release reference")]
    InvalidPointer { path: PathBuf },
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

/// Errors from loading and validating `launchpad.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    #[error("I/O error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}
