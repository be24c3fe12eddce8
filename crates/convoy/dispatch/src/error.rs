//! Dispatch error types

use convoy_types::ResourceKey;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while resolving where an application should run
#[derive(Debug, Clone, Error)]
pub enum PlacementError {
    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("Invalid topology policy {policy}: {reason}")]
    InvalidPolicy { policy: String, reason: String },

    #[error("Topology policy {policy} matched no clusters")]
    NoMatchingClusters { policy: String },

    #[error("Cluster registry unavailable: {0}")]
    Registry(String),
}

impl PlacementError {
    /// Whether a later attempt can succeed without a spec edit.
    ///
    /// Missing clusters may still be registered, so only malformed policies
    /// are terminal.
    pub fn is_transient(&self) -> bool {
        !matches!(self, PlacementError::InvalidPolicy { .. })
    }
}

/// Errors raised by a [`ResourceApplier`](crate::ResourceApplier)
#[derive(Debug, Clone, Error)]
pub enum ApplyError {
    #[error("Cluster {cluster} unreachable: {reason}")]
    Unreachable { cluster: String, reason: String },

    #[error("{key} rejected by cluster {cluster}: {reason}")]
    Rejected {
        cluster: String,
        key: ResourceKey,
        reason: String,
    },

    #[error("Write conflict on {key} in cluster {cluster}")]
    Conflict { cluster: String, key: ResourceKey },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for placement resolution
pub type PlacementResult<T> = std::result::Result<T, PlacementError>;
