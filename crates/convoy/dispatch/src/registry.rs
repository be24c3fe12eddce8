//! Cluster registry

use crate::error::{PlacementError, PlacementResult};
use async_trait::async_trait;
use convoy_types::{ClusterRef, LOCAL_CLUSTER};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lookup of target clusters by name or labels
#[async_trait]
pub trait ClusterRegistry: Send + Sync {
    /// Get a cluster by name
    async fn get(&self, name: &str) -> PlacementResult<Option<ClusterRef>>;

    /// All clusters whose labels match `selector`, ordered by name
    async fn resolve(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> PlacementResult<Vec<ClusterRef>>;
}

/// In-memory registry. The `local` cluster is always registered.
pub struct InMemoryClusterRegistry {
    clusters: DashMap<String, ClusterRef>,
    unavailable: AtomicBool,
}

impl InMemoryClusterRegistry {
    pub fn new() -> Self {
        let clusters = DashMap::new();
        clusters.insert(LOCAL_CLUSTER.to_string(), ClusterRef::local());
        Self {
            clusters,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Register or replace a cluster
    pub fn register(&self, cluster: ClusterRef) {
        self.clusters.insert(cluster.name.clone(), cluster);
    }

    /// Remove a cluster; `local` cannot be removed
    pub fn deregister(&self, name: &str) -> Option<ClusterRef> {
        if name == LOCAL_CLUSTER {
            return None;
        }
        self.clusters.remove(name).map(|(_, c)| c)
    }

    /// Make every lookup fail, as if the backing store were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> PlacementResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PlacementError::Registry("registry offline".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryClusterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterRegistry for InMemoryClusterRegistry {
    async fn get(&self, name: &str) -> PlacementResult<Option<ClusterRef>> {
        self.check_available()?;
        Ok(self.clusters.get(name).map(|c| c.clone()))
    }

    async fn resolve(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> PlacementResult<Vec<ClusterRef>> {
        self.check_available()?;
        let mut matched: Vec<ClusterRef> = self
            .clusters
            .iter()
            .filter(|c| c.matches(selector))
            .map(|c| c.clone())
            .collect();
        matched.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matched)
    }
}
