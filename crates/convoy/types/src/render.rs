//! Render output: the intermediate representation between an Application spec
//! and the resources dispatched to clusters

use crate::manifest::Manifest;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fully rendered Application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderOutput {
    pub components: Vec<RenderedComponent>,
    #[serde(default)]
    pub policies: Vec<RenderedPolicy>,
    #[serde(default)]
    pub workflow: Vec<RenderedStep>,
}

/// One component with its workload and trait outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedComponent {
    pub name: String,
    pub type_name: String,
    /// Workload after all trait patches were applied
    pub workload: Manifest,
    /// Auxiliary resources emitted by traits
    #[serde(default)]
    pub auxiliaries: Vec<Manifest>,
    /// Trait types applied, in spec order
    #[serde(default)]
    pub traits: Vec<String>,
}

impl RenderedComponent {
    /// Workload followed by auxiliaries
    pub fn manifests(&self) -> impl Iterator<Item = &Manifest> {
        std::iter::once(&self.workload).chain(self.auxiliaries.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedPolicy {
    pub name: String,
    pub type_name: String,
    pub properties: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedStep {
    pub name: String,
    pub type_name: String,
    pub properties: Value,
}

impl RenderOutput {
    pub fn component(&self, name: &str) -> Option<&RenderedComponent> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn component_names(&self) -> Vec<String> {
        self.components.iter().map(|c| c.name.clone()).collect()
    }

    /// Policies of the given type, in spec order
    pub fn policies_of_type<'a>(
        &'a self,
        type_name: &'a str,
    ) -> impl Iterator<Item = &'a RenderedPolicy> + 'a {
        self.policies.iter().filter(move |p| p.type_name == type_name)
    }

    /// Resources of the selected components in dependency order.
    ///
    /// Ordering is by apply tier first (namespaces, then configuration, then
    /// workloads, then the rest) and by render order within a tier.
    pub fn ordered_manifests<S: AsRef<str>>(&self, components: &[S]) -> Vec<(&str, &Manifest)> {
        let mut selected: Vec<(&str, &Manifest)> = self
            .components
            .iter()
            .filter(|c| components.iter().any(|s| s.as_ref() == c.name))
            .flat_map(|c| c.manifests().map(move |m| (c.name.as_str(), m)))
            .collect();
        // stable sort keeps render order inside a tier
        selected.sort_by_key(|(_, m)| m.apply_tier());
        selected
    }
}
