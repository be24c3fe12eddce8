//! Revision garbage collection
//!
//! Keeps at most `limit` unreferenced revisions per application, deleting the
//! oldest first. Referenced revisions are never deleted and do not count
//! against the limit.

use crate::error::{Result, RevisionError};
use crate::store::RevisionStore;
use convoy_types::{AppId, RevisionNumber};
use tracing::{debug, warn};

/// How many unreferenced revisions to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    KeepAll,
    Limit(usize),
}

impl Retention {
    /// Map the configured history limit; zero or negative disables GC
    pub fn from_config(limit: i64) -> Self {
        if limit <= 0 {
            Retention::KeepAll
        } else {
            Retention::Limit(limit as usize)
        }
    }
}

/// Outcome of one collection pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub deleted: Vec<RevisionNumber>,
    /// Revisions whose deletion failed; retried on the next pass
    pub failed: Vec<RevisionNumber>,
    /// Unreferenced revisions left in place
    pub retained_unreferenced: usize,
}

impl GcReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run one collection pass for `app`.
///
/// Deletion failures of individual revisions are logged and reported but do
/// not abort the pass. A revision that became referenced between listing and
/// deleting is skipped.
pub async fn collect_garbage(
    store: &dyn RevisionStore,
    app: &AppId,
    retention: Retention,
) -> Result<GcReport> {
    let Retention::Limit(limit) = retention else {
        return Ok(GcReport::default());
    };

    let referenced = store.list_referenced(app).await?;
    let unreferenced: Vec<RevisionNumber> = store
        .list(app)
        .await?
        .into_iter()
        .map(|s| s.number)
        .filter(|n| !referenced.contains(n))
        .collect();

    let excess = unreferenced.len().saturating_sub(limit);
    let mut report = GcReport {
        retained_unreferenced: unreferenced.len() - excess,
        ..Default::default()
    };

    // list() is oldest first
    for number in unreferenced.into_iter().take(excess) {
        match store.delete(app, number).await {
            Ok(_) => report.deleted.push(number),
            Err(RevisionError::Referenced { holder, .. }) => {
                debug!(app = %app, revision = %number, holder = %holder, "Revision re-pinned, skipping");
                report.retained_unreferenced += 1;
            }
            Err(e) => {
                warn!(app = %app, revision = %number, error = %e, "Failed to delete revision");
                report.failed.push(number);
            }
        }
    }

    if !report.deleted.is_empty() {
        debug!(
            app = %app,
            deleted = report.deleted.len(),
            retained = report.retained_unreferenced,
            "Revision GC pass complete"
        );
    }
    Ok(report)
}
