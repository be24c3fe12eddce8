//! The Application resource: desired state plus observed status
//!
//! The spec is owned by whoever edits the Application. The reconciliation engine
//! only ever writes `status` and releases the deletion finalizer.

use crate::ids::AppId;
use crate::status::ApplicationStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A desired-state Application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: AppId,

    /// Incremented on every spec edit
    pub generation: u64,

    /// Optimistic-concurrency token, bumped on every write (spec or status)
    pub resource_version: u64,

    /// Set once deletion was requested; the object lingers until the engine
    /// has cleaned up and released its finalizer
    #[serde(default)]
    pub deletion_requested: bool,

    pub spec: ApplicationSpec,

    #[serde(default)]
    pub status: ApplicationStatus,
}

impl Application {
    pub fn new(id: AppId, spec: ApplicationSpec) -> Self {
        Self {
            id,
            generation: 1,
            resource_version: 1,
            deletion_requested: false,
            spec,
            status: ApplicationStatus::default(),
        }
    }
}

/// Desired state of an Application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSpec {
    pub components: Vec<ComponentSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<PolicySpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowSpec>,
}

impl ApplicationSpec {
    pub fn with_component(mut self, component: ComponentSpec) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_policy(mut self, policy: PolicySpec) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn with_workflow(mut self, workflow: WorkflowSpec) -> Self {
        self.workflow = Some(workflow);
        self
    }
}

/// One component of an Application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,

    /// Component definition type, e.g. `webservice`
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub properties: Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<TraitSpec>,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, properties: Value) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            properties,
            traits: Vec::new(),
        }
    }

    pub fn with_trait(mut self, type_name: impl Into<String>, properties: Value) -> Self {
        self.traits.push(TraitSpec {
            type_name: type_name.into(),
            properties,
        });
        self
    }
}

/// A trait attached to a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitSpec {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub properties: Value,
}

/// An application-level policy, e.g. `topology` for placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,

    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub properties: Value,
}

impl PolicySpec {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, properties: Value) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            properties,
        }
    }
}

/// Ordered workflow steps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub steps: Vec<WorkflowStepSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStepSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub properties: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_deserializes_type_field() {
        let spec: ApplicationSpec = serde_json::from_value(json!({
            "components": [{
                "name": "frontend",
                "type": "webservice",
                "properties": {"image": "nginx"},
                "traits": [{"type": "scaler", "properties": {"replicas": 2}}]
            }],
            "policies": [{"name": "prod", "type": "topology", "properties": {"clusters": ["prod"]}}]
        }))
        .unwrap();

        assert_eq!(spec.components[0].type_name, "webservice");
        assert_eq!(spec.components[0].traits[0].type_name, "scaler");
        assert_eq!(spec.policies[0].type_name, "topology");
        assert!(spec.workflow.is_none());
    }

    #[test]
    fn test_new_application_starts_at_generation_one() {
        let app = Application::new(AppId::new("default", "web"), ApplicationSpec::default());
        assert_eq!(app.generation, 1);
        assert!(!app.deletion_requested);
        assert!(app.status.latest_revision.is_none());
    }
}
