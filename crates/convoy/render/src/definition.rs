//! Component, trait, policy and workflow-step definitions
//!
//! Definitions are the templates an Application spec refers to by type name.
//! A `DefinitionSet` is an immutable value; swapping definitions at runtime goes
//! through [`DefinitionStore`], which hands out snapshots.

use crate::error::TemplateError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Parameter schema: required names plus defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub defaults: Map<String, Value>,
}

impl ParameterSchema {
    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    pub fn default_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(name.into(), value);
        self
    }

    /// Merge user properties over defaults and check required parameters.
    pub fn resolve(&self, properties: &Value) -> Result<Value, TemplateError> {
        let mut resolved = self.defaults.clone();
        match properties {
            Value::Null => {}
            Value::Object(props) => {
                for (k, v) in props {
                    resolved.insert(k.clone(), v.clone());
                }
            }
            other => return Err(TemplateError::InvalidParameters(type_name(other).into())),
        }

        if let Some(missing) = self
            .required
            .iter()
            .find(|name| resolved.get(name.as_str()).map_or(true, Value::is_null))
        {
            return Err(TemplateError::MissingParameter(missing.clone()));
        }

        Ok(Value::Object(resolved))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Template for one resource: type metadata plus a JSON body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplate {
    pub api_version: String,
    pub kind: String,
    pub template: Value,
}

impl ResourceTemplate {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, template: Value) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            template,
        }
    }
}

/// Defines a component type, e.g. `webservice`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub name: String,
    pub workload: ResourceTemplate,
    #[serde(default)]
    pub parameters: ParameterSchema,
}

impl ComponentDefinition {
    pub fn new(name: impl Into<String>, workload: ResourceTemplate) -> Self {
        Self {
            name: name.into(),
            workload,
            parameters: ParameterSchema::default(),
        }
    }

    pub fn with_parameters(mut self, parameters: ParameterSchema) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Extra resource emitted by a trait, named `<component>-<suffix>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitOutput {
    pub suffix: String,
    pub resource: ResourceTemplate,
}

/// Defines a trait type, e.g. `scaler`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraitDefinition {
    pub name: String,
    /// Component types this trait may attach to; empty means any
    #[serde(default)]
    pub applies_to: Vec<String>,
    /// Deep-merged into the workload spec
    #[serde(default)]
    pub patch: Option<Value>,
    #[serde(default)]
    pub outputs: Vec<TraitOutput>,
    #[serde(default)]
    pub parameters: ParameterSchema,
}

impl TraitDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            applies_to: Vec::new(),
            patch: None,
            outputs: Vec::new(),
            parameters: ParameterSchema::default(),
        }
    }

    pub fn applies_to(mut self, component_type: impl Into<String>) -> Self {
        self.applies_to.push(component_type.into());
        self
    }

    pub fn with_patch(mut self, patch: Value) -> Self {
        self.patch = Some(patch);
        self
    }

    pub fn with_output(mut self, suffix: impl Into<String>, resource: ResourceTemplate) -> Self {
        self.outputs.push(TraitOutput {
            suffix: suffix.into(),
            resource,
        });
        self
    }

    pub fn with_parameters(mut self, parameters: ParameterSchema) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn can_apply_to(&self, component_type: &str) -> bool {
        self.applies_to.is_empty() || self.applies_to.iter().any(|t| t == component_type)
    }
}

/// Defines a policy type, e.g. `topology`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDefinition {
    pub name: String,
    #[serde(default)]
    pub parameters: ParameterSchema,
}

impl PolicyDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: ParameterSchema::default(),
        }
    }
}

/// Defines a workflow step type, e.g. `deploy`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStepDefinition {
    pub name: String,
    #[serde(default)]
    pub parameters: ParameterSchema,
}

impl WorkflowStepDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: ParameterSchema::default(),
        }
    }
}

/// Policy type that drives placement
pub const TOPOLOGY_POLICY: &str = "topology";
/// Workflow step that dispatches resources
pub const DEPLOY_STEP: &str = "deploy";
/// Workflow step that pauses a workflow
pub const SUSPEND_STEP: &str = "suspend";

/// Every definition a render may consult
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionSet {
    components: BTreeMap<String, ComponentDefinition>,
    traits: BTreeMap<String, TraitDefinition>,
    policies: BTreeMap<String, PolicyDefinition>,
    steps: BTreeMap<String, WorkflowStepDefinition>,
}

impl DefinitionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty set plus the policy and step types the engine itself understands
    pub fn with_builtins() -> Self {
        let mut set = Self::new();
        set.register_policy(PolicyDefinition::new(TOPOLOGY_POLICY));
        set.register_step(WorkflowStepDefinition::new(DEPLOY_STEP));
        set.register_step(WorkflowStepDefinition::new(SUSPEND_STEP));
        set
    }

    pub fn register_component(&mut self, def: ComponentDefinition) {
        tracing::debug!(definition = %def.name, "Component definition registered");
        self.components.insert(def.name.clone(), def);
    }

    pub fn register_trait(&mut self, def: TraitDefinition) {
        tracing::debug!(definition = %def.name, "Trait definition registered");
        self.traits.insert(def.name.clone(), def);
    }

    pub fn register_policy(&mut self, def: PolicyDefinition) {
        self.policies.insert(def.name.clone(), def);
    }

    pub fn register_step(&mut self, def: WorkflowStepDefinition) {
        self.steps.insert(def.name.clone(), def);
    }

    pub fn with_component(mut self, def: ComponentDefinition) -> Self {
        self.register_component(def);
        self
    }

    pub fn with_trait(mut self, def: TraitDefinition) -> Self {
        self.register_trait(def);
        self
    }

    pub fn component(&self, name: &str) -> Option<&ComponentDefinition> {
        self.components.get(name)
    }

    pub fn trait_def(&self, name: &str) -> Option<&TraitDefinition> {
        self.traits.get(name)
    }

    pub fn policy(&self, name: &str) -> Option<&PolicyDefinition> {
        self.policies.get(name)
    }

    pub fn step(&self, name: &str) -> Option<&WorkflowStepDefinition> {
        self.steps.get(name)
    }

    pub fn remove_component(&mut self, name: &str) -> Option<ComponentDefinition> {
        self.components.remove(name)
    }

    pub fn count(&self) -> usize {
        self.components.len() + self.traits.len() + self.policies.len() + self.steps.len()
    }
}

/// Shared, swappable holder of the current definition set
#[derive(Debug, Default)]
pub struct DefinitionStore {
    current: RwLock<Arc<DefinitionSet>>,
}

impl DefinitionStore {
    pub fn new(set: DefinitionSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(set)),
        }
    }

    /// Current definitions. The snapshot stays valid while the store is updated.
    pub fn snapshot(&self) -> Arc<DefinitionSet> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, set: DefinitionSet) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(set);
    }

    /// Copy-on-write edit of the current set
    pub fn update(&self, edit: impl FnOnce(&mut DefinitionSet)) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = (**guard).clone();
        edit(&mut next);
        *guard = Arc::new(next);
    }
}
