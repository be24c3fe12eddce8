//! Revision store trait
//!
//! Revisions are immutable: the store only creates and deletes them. Live
//! state that depends on a revision records a named *pin* on it; pinned
//! revisions are what `list_referenced` reports and what GC must keep.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convoy_types::{AppId, ApplicationRevision, Fingerprint, RenderOutput, RevisionNumber};
use std::collections::BTreeSet;

/// Pin held by `status.latestRevision`
pub const PIN_STATUS: &str = "status";
/// Pin held by the revision currently being rolled out
pub const PIN_ROLLOUT: &str = "rollout";

/// Pin held by the resources live on one cluster
pub fn cluster_pin(cluster: &str) -> String {
    format!("cluster/{}", cluster)
}

/// Input for a new revision
#[derive(Debug, Clone)]
pub struct RevisionDraft {
    /// Application generation the render came from
    pub generation: u64,
    pub render: RenderOutput,
}

/// Listing entry, without the (possibly large) render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionSummary {
    pub number: RevisionNumber,
    pub fingerprint: Fingerprint,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
}

/// Storage for application revisions.
///
/// Implementations must be safe for concurrent use across applications.
#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// Newest revision still stored, verified against its fingerprint
    async fn get_latest(&self, app: &AppId) -> Result<Option<ApplicationRevision>>;

    async fn get(&self, app: &AppId, number: RevisionNumber)
        -> Result<Option<ApplicationRevision>>;

    /// All stored revisions, oldest first
    async fn list(&self, app: &AppId) -> Result<Vec<RevisionSummary>>;

    /// Highest number ever allocated for `app` (zero if none). Never decreases,
    /// even when revisions are deleted.
    async fn latest_number(&self, app: &AppId) -> Result<RevisionNumber>;

    /// Allocate `observed + 1` and persist the draft as that revision.
    ///
    /// Fails with `Conflict` when the allocation counter is no longer
    /// `observed`. The new revision is pinned as [`PIN_ROLLOUT`] atomically
    /// with its creation.
    async fn create_next(
        &self,
        app: &AppId,
        observed: RevisionNumber,
        draft: RevisionDraft,
    ) -> Result<ApplicationRevision>;

    /// Delete one revision. Returns false if it did not exist; fails with
    /// `Referenced` when a pin still points at it.
    async fn delete(&self, app: &AppId, number: RevisionNumber) -> Result<bool>;

    /// Delete every revision and pin of `app`, regardless of references.
    /// The allocation counter is kept so numbers are never reused.
    async fn delete_all(&self, app: &AppId) -> Result<usize>;

    /// Point `holder` at `number`, replacing what it pointed at before
    async fn pin(&self, app: &AppId, holder: &str, number: RevisionNumber) -> Result<()>;

    async fn unpin(&self, app: &AppId, holder: &str) -> Result<()>;

    /// Revision numbers currently referenced by any pin
    async fn list_referenced(&self, app: &AppId) -> Result<BTreeSet<RevisionNumber>>;
}
