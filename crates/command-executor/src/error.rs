//! Error types for command execution

use std::time::Duration;
use thiserror::Error;

/// Unified error type for command execution
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to spawn a process
    #[error("failed to spawn process: {reason}")]
    SpawnFailed {
        /// The reason for the spawn failure
        reason: String,
    },

    /// Command not found
    #[error("command not found: {command}")]
    CommandNotFound {
        /// The command that was not found
        command: String,
    },

    /// The command did not finish before its deadline
    #[error("command `{command}` timed out after {after:?}")]
    TimedOut {
        /// The command line that was running
        command: String,
        /// How long it was allowed to run
        after: Duration,
    },

    /// The command ran but exited unsuccessfully
    #[error("command `{command}` exited with {code:?}: {stderr}")]
    NonZeroExit {
        /// The command line that failed
        command: String,
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Captured standard error, trimmed
        stderr: String,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a spawn failed error
    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            reason: reason.into(),
        }
    }

    /// Add layer context to an error message
    pub fn with_layer_context(self, layer: impl Into<String>) -> Self {
        match self {
            Error::SpawnFailed { reason } => Error::SpawnFailed {
                reason: format!("in {} layer: {}", layer.into(), reason),
            },
            other => other,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
