//! Placement resolution from topology policies
//!
//! A `topology` policy names target clusters directly (`clusters`) or by
//! labels (`clusterLabelSelector`) and optionally restricts itself to a subset
//! of components. Several policies union per cluster. When the application has
//! a workflow, only the topology policies referenced by `deploy` steps before
//! the first `suspend` step take part. Without any selected topology policy the
//! whole application lands on the `local` cluster.

use crate::error::{PlacementError, PlacementResult};
use crate::registry::ClusterRegistry;
use convoy_types::{ClusterRef, RenderOutput, RenderedPolicy, LOCAL_CLUSTER};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

const TOPOLOGY: &str = "topology";
const DEPLOY: &str = "deploy";
const SUSPEND: &str = "suspend";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopologyProperties {
    #[serde(default)]
    clusters: Vec<String>,
    #[serde(default)]
    cluster_label_selector: BTreeMap<String, String>,
    #[serde(default)]
    components: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct DeployProperties {
    #[serde(default)]
    policies: Option<Vec<String>>,
}

/// Components assigned to one cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub cluster: ClusterRef,
    pub components: BTreeSet<String>,
}

/// Where every component of an application should run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementDecision {
    pub targets: BTreeMap<String, Placement>,
}

impl PlacementDecision {
    pub fn cluster_names(&self) -> Vec<String> {
        self.targets.keys().cloned().collect()
    }

    pub fn get(&self, cluster: &str) -> Option<&Placement> {
        self.targets.get(cluster)
    }

    pub fn contains(&self, cluster: &str) -> bool {
        self.targets.contains_key(cluster)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Clusters a component was placed on
    pub fn clusters_for(&self, component: &str) -> Vec<String> {
        self.targets
            .values()
            .filter(|p| p.components.contains(component))
            .map(|p| p.cluster.name.clone())
            .collect()
    }

    fn assign(&mut self, cluster: ClusterRef, components: &[String]) {
        self.targets
            .entry(cluster.name.clone())
            .or_insert_with(|| Placement {
                cluster,
                components: BTreeSet::new(),
            })
            .components
            .extend(components.iter().cloned());
    }
}

/// Topology policies that take part in this render, in selection order
pub fn active_topology_policies(render: &RenderOutput) -> Vec<&RenderedPolicy> {
    let topology: Vec<&RenderedPolicy> = render.policies_of_type(TOPOLOGY).collect();
    if render.workflow.is_empty() {
        return topology;
    }

    let mut selected: Vec<&RenderedPolicy> = Vec::new();
    for step in &render.workflow {
        match step.type_name.as_str() {
            SUSPEND => break,
            DEPLOY => {
                let props: DeployProperties =
                    serde_json::from_value(step.properties.clone()).unwrap_or_default();
                let policies: Vec<&RenderedPolicy> = match props.policies {
                    Some(names) => topology
                        .iter()
                        .copied()
                        .filter(|p| names.contains(&p.name))
                        .collect(),
                    None => topology.clone(),
                };
                for policy in policies {
                    if !selected.iter().any(|s| s.name == policy.name) {
                        selected.push(policy);
                    }
                }
            }
            _ => {}
        }
    }
    selected
}

/// Resolve the placement of a render against the registry
pub async fn resolve_placement(
    render: &RenderOutput,
    registry: &dyn ClusterRegistry,
) -> PlacementResult<PlacementDecision> {
    let all_components = render.component_names();
    let mut decision = PlacementDecision::default();

    let policies = active_topology_policies(render);
    if policies.is_empty() {
        let local = registry
            .get(LOCAL_CLUSTER)
            .await?
            .unwrap_or_else(ClusterRef::local);
        decision.assign(local, &all_components);
        return Ok(decision);
    }

    for policy in policies {
        let props: TopologyProperties = serde_json::from_value(policy.properties.clone())
            .map_err(|e| PlacementError::InvalidPolicy {
                policy: policy.name.clone(),
                reason: e.to_string(),
            })?;
        if props.clusters.is_empty() && props.cluster_label_selector.is_empty() {
            return Err(PlacementError::InvalidPolicy {
                policy: policy.name.clone(),
                reason: "neither clusters nor clusterLabelSelector is set".into(),
            });
        }

        let mut clusters = Vec::new();
        for name in &props.clusters {
            let cluster = registry
                .get(name)
                .await?
                .ok_or_else(|| PlacementError::ClusterNotFound(name.clone()))?;
            clusters.push(cluster);
        }
        if !props.cluster_label_selector.is_empty() {
            clusters.extend(registry.resolve(&props.cluster_label_selector).await?);
        }
        if clusters.is_empty() {
            return Err(PlacementError::NoMatchingClusters {
                policy: policy.name.clone(),
            });
        }

        let components = props.components.unwrap_or_else(|| all_components.clone());
        debug!(
            policy = %policy.name,
            clusters = clusters.len(),
            components = components.len(),
            "Topology policy resolved"
        );
        for cluster in clusters {
            decision.assign(cluster, &components);
        }
    }

    Ok(decision)
}
