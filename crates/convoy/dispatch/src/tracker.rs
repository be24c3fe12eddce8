//! Resource tracker
//!
//! Remembers, per application and cluster, which resources we own there. A
//! key is tracked before it is first written so an interrupted dispatch never
//! leaves an untracked object behind.

use convoy_types::{AppId, ClusterRef, ResourceKey, RevisionNumber};
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};

/// Resources owned by one application on one cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedResources {
    pub cluster: ClusterRef,
    /// Revision of the last complete dispatch, if any
    pub revision: Option<RevisionNumber>,
    pub resources: BTreeSet<ResourceKey>,
}

/// Thread-safe tracker shared by all dispatches
pub struct ResourceTracker {
    entries: DashMap<AppId, BTreeMap<String, TrackedResources>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, app: &AppId, cluster: &str) -> Option<TrackedResources> {
        self.entries
            .get(app)
            .and_then(|clusters| clusters.get(cluster).cloned())
    }

    /// Everything tracked for `app`, by cluster name
    pub fn all(&self, app: &AppId) -> BTreeMap<String, TrackedResources> {
        self.entries
            .get(app)
            .map(|clusters| clusters.clone())
            .unwrap_or_default()
    }

    pub fn clusters(&self, app: &AppId) -> Vec<String> {
        self.entries
            .get(app)
            .map(|clusters| clusters.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Start owning `key` on `cluster`
    pub fn track(&self, app: &AppId, cluster: &ClusterRef, key: ResourceKey) {
        self.entries
            .entry(app.clone())
            .or_default()
            .entry(cluster.name.clone())
            .or_insert_with(|| TrackedResources {
                cluster: cluster.clone(),
                revision: None,
                resources: BTreeSet::new(),
            })
            .resources
            .insert(key);
    }

    /// Record the outcome of a complete dispatch: exactly `resources` are
    /// owned now, at `revision`.
    pub fn settle(
        &self,
        app: &AppId,
        cluster: &ClusterRef,
        revision: RevisionNumber,
        resources: BTreeSet<ResourceKey>,
    ) {
        self.entries.entry(app.clone()).or_default().insert(
            cluster.name.clone(),
            TrackedResources {
                cluster: cluster.clone(),
                revision: Some(revision),
                resources,
            },
        );
    }

    /// Stop owning `key` on `cluster`
    pub fn untrack(&self, app: &AppId, cluster: &str, key: &ResourceKey) {
        if let Some(mut clusters) = self.entries.get_mut(app) {
            if let Some(tracked) = clusters.get_mut(cluster) {
                tracked.resources.remove(key);
            }
        }
    }

    /// Drop a cluster from the application's tracked set
    pub fn release(&self, app: &AppId, cluster: &str) -> Option<TrackedResources> {
        let mut clusters = self.entries.get_mut(app)?;
        clusters.remove(cluster)
    }

    /// Forget the application entirely
    pub fn forget(&self, app: &AppId) {
        self.entries.remove(app);
    }
}

impl Default for ResourceTracker {
    fn default() -> Self {
        Self::new()
    }
}
