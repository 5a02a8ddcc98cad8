//! Error types for shared and local rollout state.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while reading or writing rollout state.
#[derive(Debug, Error)]
pub enum StateError {
    /// The shared store could not be reached or rejected the command.
    #[error("shared store error: {0}")]
    Store(String),

    #[error("release tag is empty")]
    EmptyTag,

    #[error("local state {path}: {source}")]
    LocalIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("corrupt local state {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("version command {command:?} failed: {reason}")]
    VersionQuery { command: String, reason: String },

    #[error("serialization error: {0}")]
    Serialize(String),
}

impl From<redis::RedisError> for StateError {
    fn from(e: redis::RedisError) -> Self {
        StateError::Store(e.to_string())
    }
}
