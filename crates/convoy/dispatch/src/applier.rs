//! Resource application seam
//!
//! The dispatcher never talks to a cluster directly; it goes through a
//! [`ResourceApplier`] that performs compare-and-patch writes.

use crate::error::ApplyError;
use async_trait::async_trait;
use convoy_types::{ClusterRef, Manifest, ResourceKey};
use std::fmt;

/// What an apply did to the live object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Object did not exist and was created
    Created,
    /// Desired state changed and the live object was patched
    Configured,
    /// Live object already matched; nothing was written
    Unchanged,
    /// Desired state was unchanged but the live object had diverged
    DriftCorrected,
}

impl ApplyOutcome {
    /// Whether a write happened
    pub fn wrote(&self) -> bool {
        !matches!(self, ApplyOutcome::Unchanged)
    }
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplyOutcome::Created => "created",
            ApplyOutcome::Configured => "configured",
            ApplyOutcome::Unchanged => "unchanged",
            ApplyOutcome::DriftCorrected => "drift-corrected",
        };
        write!(f, "{}", s)
    }
}

/// Applies resources to target clusters.
///
/// `apply` must be a compare-and-patch: fields written by other actors and
/// never owned by us are preserved, and no write happens when the live
/// object already matches.
#[async_trait]
pub trait ResourceApplier: Send + Sync {
    async fn apply(
        &self,
        cluster: &ClusterRef,
        manifest: &Manifest,
    ) -> Result<ApplyOutcome, ApplyError>;

    /// Delete a resource. Returns false if it was already gone.
    async fn delete(&self, cluster: &ClusterRef, key: &ResourceKey) -> Result<bool, ApplyError>;
}
