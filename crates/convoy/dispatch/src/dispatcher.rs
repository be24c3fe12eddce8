//! Multi-cluster dispatcher
//!
//! Applies one revision to every cluster of a placement decision. Targets are
//! independent: each one runs concurrently under its own timeout and a failure
//! on one never affects another. Within a target, resources are applied in
//! dependency order and the first failure stops that target.

use crate::applier::{ApplyOutcome, ResourceApplier};
use crate::error::ApplyError;
use crate::placement::{Placement, PlacementDecision};
use crate::tracker::ResourceTracker;
use convoy_types::{
    AppId, ApplicationRevision, ClusterRef, Manifest, ResourceKey, RevisionNumber, TargetState,
    LABEL_COMPONENT_REVISION,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound for dispatching to a single cluster
    pub target_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            target_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of dispatching to one cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    Applied,
    /// Applied, and at least one live object had diverged and was corrected
    AppliedWithDrift,
    Failed(String),
}

impl TargetOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, TargetOutcome::Failed(_))
    }

    pub fn state(&self) -> TargetState {
        match self {
            TargetOutcome::Applied => TargetState::Applied,
            TargetOutcome::AppliedWithDrift => TargetState::AppliedWithDrift,
            TargetOutcome::Failed(_) => TargetState::Failed,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            TargetOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TargetResult {
    pub cluster: String,
    pub outcome: TargetOutcome,
    /// Components placed on this cluster
    pub components: BTreeSet<String>,
    /// Resources written (created, patched or drift-corrected)
    pub written: usize,
    pub unchanged: usize,
    /// Stale resources removed after a successful apply
    pub pruned: Vec<ResourceKey>,
}

impl TargetResult {
    fn failed(placement: &Placement, reason: String, written: usize, unchanged: usize) -> Self {
        Self {
            cluster: placement.cluster.name.clone(),
            outcome: TargetOutcome::Failed(reason),
            components: placement.components.clone(),
            written,
            unchanged,
            pruned: Vec::new(),
        }
    }
}

/// Combined result over all targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DispatchAggregate {
    Failed,
    Degraded,
    Succeeded,
}

impl DispatchAggregate {
    /// `Succeeded` iff every target succeeded, `Failed` if none did (or there
    /// were no targets), `Degraded` otherwise.
    pub fn of(targets: &[TargetResult]) -> Self {
        let ok = targets.iter().filter(|t| t.outcome.is_success()).count();
        if ok == 0 {
            DispatchAggregate::Failed
        } else if ok == targets.len() {
            DispatchAggregate::Succeeded
        } else {
            DispatchAggregate::Degraded
        }
    }
}

impl fmt::Display for DispatchAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub revision: RevisionNumber,
    /// One entry per placed cluster, ordered by cluster name
    pub targets: Vec<TargetResult>,
    pub aggregate: DispatchAggregate,
    /// Clusters that left the placement and were cleaned up
    pub released: Vec<String>,
}

impl DispatchReport {
    pub fn target(&self, cluster: &str) -> Option<&TargetResult> {
        self.targets.iter().find(|t| t.cluster == cluster)
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.targets
            .iter()
            .filter(|t| t.outcome.is_success())
            .map(|t| t.cluster.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<&TargetResult> {
        self.targets
            .iter()
            .filter(|t| !t.outcome.is_success())
            .collect()
    }

    pub fn written(&self) -> usize {
        self.targets.iter().map(|t| t.written).sum()
    }
}

/// Applies revisions to clusters and keeps the resource tracker current
pub struct Dispatcher {
    applier: Arc<dyn ResourceApplier>,
    tracker: Arc<ResourceTracker>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        applier: Arc<dyn ResourceApplier>,
        tracker: Arc<ResourceTracker>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            applier,
            tracker,
            config,
        }
    }

    pub fn tracker(&self) -> &Arc<ResourceTracker> {
        &self.tracker
    }

    /// Dispatch `revision` according to `placement`.
    ///
    /// Clusters tracked for the application but missing from the placement are
    /// released unless every target failed.
    #[instrument(skip_all, fields(app = %app, revision = %revision.number))]
    pub async fn apply(
        &self,
        app: &AppId,
        revision: &ApplicationRevision,
        placement: &PlacementDecision,
    ) -> DispatchReport {
        let targets = join_all(
            placement
                .targets
                .values()
                .map(|p| self.dispatch_target(app, revision, p)),
        )
        .await;

        let aggregate = DispatchAggregate::of(&targets);
        let released = if aggregate == DispatchAggregate::Failed {
            Vec::new()
        } else {
            self.release_unplaced(app, placement).await
        };

        info!(
            targets = targets.len(),
            aggregate = %aggregate,
            released = released.len(),
            "Dispatch complete"
        );

        DispatchReport {
            revision: revision.number,
            targets,
            aggregate,
            released,
        }
    }

    /// Delete every resource tracked for `app` on every cluster.
    ///
    /// Resources that could not be deleted stay tracked and the first error is
    /// returned, so the caller can retry.
    #[instrument(skip_all, fields(app = %app))]
    pub async fn cleanup(&self, app: &AppId) -> Result<usize, ApplyError> {
        let mut deleted = 0;
        let mut first_error = None;

        for (name, tracked) in self.tracker.all(app) {
            let mut remaining = false;
            for key in &tracked.resources {
                match self.applier.delete(&tracked.cluster, key).await {
                    Ok(existed) => {
                        if existed {
                            deleted += 1;
                        }
                        self.tracker.untrack(app, &name, key);
                    }
                    Err(e) => {
                        warn!(cluster = %name, resource = %key, error = %e, "Cleanup delete failed");
                        remaining = true;
                        first_error.get_or_insert(e);
                    }
                }
            }
            if !remaining {
                self.tracker.release(app, &name);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                self.tracker.forget(app);
                info!(deleted, "Cleanup complete");
                Ok(deleted)
            }
        }
    }

    async fn dispatch_target(
        &self,
        app: &AppId,
        revision: &ApplicationRevision,
        placement: &Placement,
    ) -> TargetResult {
        let timeout = self.config.target_timeout;
        match tokio::time::timeout(timeout, self.apply_target(app, revision, placement)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(cluster = %placement.cluster.name, ?timeout, "Dispatch to cluster timed out");
                TargetResult::failed(placement, ApplyError::Timeout(timeout).to_string(), 0, 0)
            }
        }
    }

    async fn apply_target(
        &self,
        app: &AppId,
        revision: &ApplicationRevision,
        placement: &Placement,
    ) -> TargetResult {
        let cluster = &placement.cluster;
        let manifests = desired_manifests(revision, placement);

        let mut written = 0;
        let mut unchanged = 0;
        let mut drifted = false;
        for manifest in &manifests {
            self.tracker.track(app, cluster, manifest.key());
            match self.applier.apply(cluster, manifest).await {
                Ok(ApplyOutcome::Unchanged) => unchanged += 1,
                Ok(ApplyOutcome::DriftCorrected) => {
                    drifted = true;
                    written += 1;
                }
                Ok(_) => written += 1,
                Err(e) => {
                    warn!(
                        cluster = %cluster.name,
                        resource = %manifest.key(),
                        error = %e,
                        "Apply failed, stopping target"
                    );
                    return TargetResult::failed(placement, e.to_string(), written, unchanged);
                }
            }
        }

        let desired: BTreeSet<ResourceKey> = manifests.iter().map(Manifest::key).collect();
        let (pruned, leftover) = self.prune(app, cluster, &desired).await;
        let mut owned = desired;
        owned.extend(leftover);
        self.tracker.settle(app, cluster, revision.number, owned);

        debug!(cluster = %cluster.name, written, unchanged, pruned = pruned.len(), "Target applied");
        TargetResult {
            cluster: cluster.name.clone(),
            outcome: if drifted {
                TargetOutcome::AppliedWithDrift
            } else {
                TargetOutcome::Applied
            },
            components: placement.components.clone(),
            written,
            unchanged,
            pruned,
        }
    }

    /// Delete tracked resources that are no longer desired on `cluster`.
    /// Returns the deleted keys and the keys whose deletion failed.
    async fn prune(
        &self,
        app: &AppId,
        cluster: &ClusterRef,
        desired: &BTreeSet<ResourceKey>,
    ) -> (Vec<ResourceKey>, Vec<ResourceKey>) {
        let Some(tracked) = self.tracker.get(app, &cluster.name) else {
            return (Vec::new(), Vec::new());
        };

        let mut pruned = Vec::new();
        let mut leftover = Vec::new();
        for key in tracked.resources.difference(desired) {
            match self.applier.delete(cluster, key).await {
                Ok(_) => pruned.push(key.clone()),
                Err(e) => {
                    warn!(cluster = %cluster.name, resource = %key, error = %e, "Prune failed");
                    leftover.push(key.clone());
                }
            }
        }
        (pruned, leftover)
    }

    async fn release_unplaced(&self, app: &AppId, placement: &PlacementDecision) -> Vec<String> {
        let mut released = Vec::new();
        for (name, tracked) in self.tracker.all(app) {
            if placement.contains(&name) {
                continue;
            }
            let mut remaining = false;
            for key in &tracked.resources {
                match self.applier.delete(&tracked.cluster, key).await {
                    Ok(_) => self.tracker.untrack(app, &name, key),
                    Err(e) => {
                        warn!(cluster = %name, resource = %key, error = %e, "Release delete failed");
                        remaining = true;
                    }
                }
            }
            if !remaining {
                self.tracker.release(app, &name);
                info!(cluster = %name, "Cluster released");
                released.push(name);
            }
        }
        released
    }
}

/// Resources of the placed components in apply order, stamped with their
/// component revision
fn desired_manifests(revision: &ApplicationRevision, placement: &Placement) -> Vec<Manifest> {
    let components: Vec<&str> = placement.components.iter().map(String::as_str).collect();
    revision
        .render
        .ordered_manifests(&components)
        .into_iter()
        .map(|(component, manifest)| {
            let mut manifest = manifest.clone();
            if let Some(component_revision) = revision.component_revision(component) {
                manifest
                    .labels
                    .insert(LABEL_COMPONENT_REVISION.to_string(), component_revision.name());
            }
            manifest
        })
        .collect()
}
