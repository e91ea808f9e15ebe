use std::path::PathBuf;

use thiserror::Error;

use launchpad_core::StoreError;

/// Errors around a deploy run: locking, history and store access.
///
/// Failures *inside* a run are not errors; they end the run with an
/// [`crate::Outcome`].
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("another deploy is running (lock {path}{})", holder_label(.holder))]
    Locked { path: PathBuf, holder: Option<u32> },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("history JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn holder_label(holder: &Option<u32>) -> String {
    match holder {
        Some(pid) => format!(", held by pid {pid}"),
        None => String::new(),
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DeployError {
    DeployError::Io {
        path: path.into(),
        source,
    }
}
