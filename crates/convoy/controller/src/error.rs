//! Controller error types

use crate::state::ReconcilePhase;
use convoy_dispatch::{ApplyError, PlacementError};
use convoy_revision::RevisionError;
use convoy_types::AppId;
use thiserror::Error;

/// Application store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Application not found: {0}")]
    NotFound(AppId),

    #[error("Stale write for {app}: expected resource version {expected}, found {actual}")]
    Conflict {
        app: AppId,
        expected: u64,
        actual: u64,
    },

    #[error("Application store unavailable: {0}")]
    Unavailable(String),
}

/// Controller errors
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Application store error: {0}")]
    Store(#[from] StoreError),

    #[error("Revision error: {0}")]
    Revision(#[from] RevisionError),

    #[error("Placement error: {0}")]
    Placement(#[from] PlacementError),

    #[error("Cleanup failed: {0}")]
    Cleanup(#[from] ApplyError),

    #[error("Invalid reconcile transition: {from} -> {to}")]
    InvalidTransition {
        from: ReconcilePhase,
        to: ReconcilePhase,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ControllerError {
    /// Whether the key should be retried with backoff. Anything else abandons
    /// the key until the next edit or resync.
    pub fn is_transient(&self) -> bool {
        match self {
            ControllerError::Store(StoreError::NotFound(_)) => false,
            ControllerError::Store(_) => true,
            ControllerError::Revision(e) => e.is_transient(),
            ControllerError::Placement(e) => e.is_transient(),
            ControllerError::Cleanup(_) => true,
            ControllerError::InvalidTransition { .. }
            | ControllerError::Config(_)
            | ControllerError::InvalidRequest(_) => false,
        }
    }
}

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;
