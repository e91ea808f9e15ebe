//! Error types for host-side capabilities.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use launchpad_core::BuildAttempt;

/// Failure of an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Non-zero exit. `status` is `None` when the process was killed by a signal.
    #[error("`{command}` {}: {stderr}", exit_label(.status))]
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    #[error("I/O error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    /// Exit status if the command ran to completion.
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            CommandError::Failed { status, .. } => *status,
            _ => None,
        }
    }
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

/// Both build attempts failed.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build failed after {} attempt(s): {last_error}", .attempts.len())]
    Exhausted {
        attempts: Vec<BuildAttempt>,
        last_error: String,
    },
}

impl BuildError {
    pub fn attempts(&self) -> &[BuildAttempt] {
        match self {
            BuildError::Exhausted { attempts, .. } => attempts,
        }
    }
}

/// A service start/stop/recreate operation failed.
#[derive(Debug, Error)]
#[error("{action} failed: {source}")]
pub struct ControllerError {
    pub action: &'static str,
    #[source]
    pub source: CommandError,
}

/// Host inspection or swap management failure.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read {what} from {path}")]
    Unparseable { what: &'static str, path: PathBuf },

    #[error(transparent)]
    Command(#[from] CommandError),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> GuardError {
    GuardError::Io {
        path: path.into(),
        source,
    }
}
