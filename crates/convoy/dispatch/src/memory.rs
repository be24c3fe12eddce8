//! In-memory fleet of clusters for development and testing
//!
//! Every live object remembers the last configuration we applied to it, which
//! gives apply three-way-merge semantics: fields we dropped are removed, fields
//! written by someone else are kept, and divergence in fields we own is
//! reported as drift.

use crate::applier::{ApplyOutcome, ResourceApplier};
use crate::error::ApplyError;
use async_trait::async_trait;
use convoy_types::merge::{merge, remove_dropped};
use convoy_types::{ClusterRef, Manifest, ResourceKey};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
struct LiveObject {
    manifest: Manifest,
    last_applied: Manifest,
    version: u64,
}

/// A set of simulated clusters with fault injection
pub struct InMemoryFleet {
    objects: DashMap<(String, ResourceKey), LiveObject>,
    faults: DashMap<String, String>,
    rejections: DashMap<ResourceKey, String>,
    delays: DashMap<String, Duration>,
    writes: AtomicU64,
}

impl InMemoryFleet {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            faults: DashMap::new(),
            rejections: DashMap::new(),
            delays: DashMap::new(),
            writes: AtomicU64::new(0),
        }
    }

    /// Make every call against `cluster` fail as unreachable
    pub fn fail_cluster(&self, cluster: &str, reason: impl Into<String>) {
        self.faults.insert(cluster.to_string(), reason.into());
    }

    pub fn heal_cluster(&self, cluster: &str) {
        self.faults.remove(cluster);
    }

    /// Reject applies of one resource on every cluster
    pub fn reject(&self, key: ResourceKey, reason: impl Into<String>) {
        self.rejections.insert(key, reason.into());
    }

    pub fn accept(&self, key: &ResourceKey) {
        self.rejections.remove(key);
    }

    /// Delay every call against `cluster`
    pub fn delay_cluster(&self, cluster: &str, delay: Duration) {
        self.delays.insert(cluster.to_string(), delay);
    }

    /// Modify a live object behind our back. Returns false if it does not exist.
    pub fn tamper(&self, cluster: &str, key: &ResourceKey, patch: &Value) -> bool {
        match self.objects.get_mut(&(cluster.to_string(), key.clone())) {
            Some(mut object) => {
                merge(&mut object.manifest.spec, patch);
                object.version += 1;
                true
            }
            None => false,
        }
    }

    /// Current live state of a resource
    pub fn live(&self, cluster: &str, key: &ResourceKey) -> Option<Manifest> {
        self.objects
            .get(&(cluster.to_string(), key.clone()))
            .map(|o| o.manifest.clone())
    }

    /// Version counter of a live object, bumped on every write
    pub fn version(&self, cluster: &str, key: &ResourceKey) -> Option<u64> {
        self.objects
            .get(&(cluster.to_string(), key.clone()))
            .map(|o| o.version)
    }

    /// Keys of every resource live on `cluster`, sorted
    pub fn resources(&self, cluster: &str) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = self
            .objects
            .iter()
            .filter(|e| e.key().0 == cluster)
            .map(|e| e.key().1.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Total number of writes (creates, patches, deletes) across the fleet
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    async fn enter(&self, cluster: &ClusterRef) -> Result<(), ApplyError> {
        let delay = self.delays.get(&cluster.name).map(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.faults.get(&cluster.name) {
            return Err(ApplyError::Unreachable {
                cluster: cluster.name.clone(),
                reason: reason.clone(),
            });
        }
        Ok(())
    }
}

impl Default for InMemoryFleet {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceApplier for InMemoryFleet {
    async fn apply(
        &self,
        cluster: &ClusterRef,
        manifest: &Manifest,
    ) -> Result<ApplyOutcome, ApplyError> {
        self.enter(cluster).await?;

        let key = manifest.key();
        if let Some(reason) = self.rejections.get(&key) {
            return Err(ApplyError::Rejected {
                cluster: cluster.name.clone(),
                key,
                reason: reason.clone(),
            });
        }

        let outcome = match self.objects.entry((cluster.name.clone(), key.clone())) {
            Entry::Vacant(vacant) => {
                vacant.insert(LiveObject {
                    manifest: manifest.clone(),
                    last_applied: manifest.clone(),
                    version: 1,
                });
                ApplyOutcome::Created
            }
            Entry::Occupied(mut occupied) => {
                let object = occupied.get_mut();
                let mut patched = object.manifest.clone();
                remove_dropped(&mut patched.spec, &object.last_applied.spec, &manifest.spec);
                merge(&mut patched.spec, &manifest.spec);
                for label in object.last_applied.labels.keys() {
                    if !manifest.labels.contains_key(label) {
                        patched.labels.remove(label);
                    }
                }
                patched
                    .labels
                    .extend(manifest.labels.iter().map(|(k, v)| (k.clone(), v.clone())));

                let intent_changed = object.last_applied != *manifest;
                if !intent_changed && patched == object.manifest {
                    ApplyOutcome::Unchanged
                } else {
                    object.manifest = patched;
                    object.last_applied = manifest.clone();
                    object.version += 1;
                    if intent_changed {
                        ApplyOutcome::Configured
                    } else {
                        ApplyOutcome::DriftCorrected
                    }
                }
            }
        };

        if outcome.wrote() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        debug!(cluster = %cluster.name, resource = %key, outcome = %outcome, "Resource applied");
        Ok(outcome)
    }

    async fn delete(&self, cluster: &ClusterRef, key: &ResourceKey) -> Result<bool, ApplyError> {
        self.enter(cluster).await?;
        let removed = self
            .objects
            .remove(&(cluster.name.clone(), key.clone()))
            .is_some();
        if removed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }
}
