//! Crate-wide error type.
//!
//! Every fallible operation returns [`PosError`]. Storage failures are
//! logged where they happen and then propagated unchanged; nothing here is
//! fatal to the process.

use thiserror::Error;

/// Result alias used across the crate.
pub type PosResult<T> = Result<T, PosError>;

#[derive(Debug, Error)]
pub enum PosError {
    /// Form input rejected before any persistence call.
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("no signed-in owner")]
    NotAuthenticated,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Aggregate failure of a commit batch. Operations that succeeded stay
    /// applied.
    #[error("{failed} of {total} order line operations failed: {}", .messages.join("; "))]
    Commit {
        failed: usize,
        total: usize,
        messages: Vec<String>,
    },

    #[error("background task failed: {0}")]
    Task(String),
}

impl PosError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

impl<T> From<std::sync::PoisonError<T>> for PosError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}

impl From<tokio::task::JoinError> for PosError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}
