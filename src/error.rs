//! Typed error taxonomy for grove-core.
//!
//! Propagation policy: validation errors surface synchronously and never
//! touch the catalog; `GitFailed`/`Storage` during a fatal lifecycle step
//! roll back whatever the enclosing operation inserted.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GroveError {
    #[error("invalid clone url: {0}")]
    InvalidUrl(String),

    #[error("invalid branch name: {0}")]
    InvalidBranch(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("git {op} failed (exit {exit_code}): {stderr}")]
    GitFailed {
        op: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GroveError>;

impl From<rusqlite::Error> for GroveError {
    fn from(e: rusqlite::Error) -> Self {
        GroveError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for GroveError {
    fn from(e: std::io::Error) -> Self {
        GroveError::Storage(e.to_string())
    }
}

impl GroveError {
    pub fn git_failed(op: impl Into<String>, exit_code: i32, stderr: impl Into<String>) -> Self {
        GroveError::GitFailed {
            op: op.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }
}
