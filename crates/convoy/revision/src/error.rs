//! Revision store error types

use convoy_types::{AppId, RevisionNumber};
use thiserror::Error;

/// Errors that can occur during revision operations.
#[derive(Debug, Clone, Error)]
pub enum RevisionError {
    /// Another writer allocated a revision number first. Re-read the latest
    /// number and retry.
    #[error("revision conflict for {app}: expected latest {expected}, found {actual}")]
    Conflict {
        app: AppId,
        expected: RevisionNumber,
        actual: RevisionNumber,
    },

    /// Revision is pinned by live state and cannot be deleted.
    #[error("revision {number} of {app} is still referenced by {holder}")]
    Referenced {
        app: AppId,
        number: RevisionNumber,
        holder: String,
    },

    /// Persisted revision no longer matches its own fingerprint.
    #[error("revision {number} of {app} is corrupted: {reason}")]
    Corrupted {
        app: AppId,
        number: RevisionNumber,
        reason: String,
    },

    /// Backend failure (network, timeout, ...).
    #[error("storage error: {0}")]
    Storage(String),
}

impl RevisionError {
    /// Whether retrying later can succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RevisionError::Conflict { .. } | RevisionError::Storage(_)
        )
    }
}

/// Result type for revision operations.
pub type Result<T> = std::result::Result<T, RevisionError>;
