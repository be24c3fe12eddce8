//! Renders an Application spec into component manifests
//!
//! Rendering is a pure function of (spec, definitions): the same inputs always
//! produce the same output, which is what makes revision fingerprints
//! meaningful.

use crate::definition::{DefinitionSet, DefinitionStore, DEPLOY_STEP, TOPOLOGY_POLICY};
use crate::error::{DefinitionKind, RenderError, Result};
use crate::template::{expand, TemplateScope};
use convoy_types::merge::merge;
use convoy_types::{
    AppId, Application, ApplicationSpec, ComponentSpec, Manifest, RenderOutput,
    RenderedComponent, RenderedPolicy, RenderedStep, LABEL_APP_NAME, LABEL_COMPONENT,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Rendering capability consumed by the reconciler
pub trait Renderer: Send + Sync {
    fn render(&self, app: &Application) -> Result<RenderOutput>;
}

/// Renderer backed by JSON templates from a [`DefinitionStore`]
pub struct TemplateRenderer {
    definitions: Arc<DefinitionStore>,
}

impl TemplateRenderer {
    pub fn new(definitions: Arc<DefinitionStore>) -> Self {
        Self { definitions }
    }
}

impl Renderer for TemplateRenderer {
    fn render(&self, app: &Application) -> Result<RenderOutput> {
        let definitions = self.definitions.snapshot();
        render(&app.id, &app.spec, &definitions)
    }
}

/// Render `spec` for application `app` against `definitions`.
pub fn render(
    app: &AppId,
    spec: &ApplicationSpec,
    definitions: &DefinitionSet,
) -> Result<RenderOutput> {
    validate_names(
        "component",
        spec.components.iter().map(|c| c.name.as_str()),
        true,
    )?;

    let components = spec
        .components
        .iter()
        .map(|component| render_component(app, component, definitions))
        .collect::<Result<Vec<_>>>()?;
    check_resource_identities(&components)?;

    let known_components: BTreeSet<&str> = spec.components.iter().map(|c| c.name.as_str()).collect();

    validate_names("policy", spec.policies.iter().map(|p| p.name.as_str()), false)?;
    let mut policies = Vec::with_capacity(spec.policies.len());
    for policy in &spec.policies {
        let def = definitions
            .policy(&policy.type_name)
            .ok_or_else(|| RenderError::DefinitionNotFound {
                kind: DefinitionKind::Policy,
                name: policy.type_name.clone(),
            })?;
        let properties = def
            .parameters
            .resolve(&policy.properties)
            .map_err(|e| RenderError::template(format!("policy {}", policy.name), e))?;
        if policy.type_name == TOPOLOGY_POLICY {
            check_topology_components(&policy.name, &properties, &known_components)?;
        }
        policies.push(RenderedPolicy {
            name: policy.name.clone(),
            type_name: policy.type_name.clone(),
            properties,
        });
    }

    let steps = spec.workflow.as_ref().map(|w| w.steps.as_slice()).unwrap_or(&[]);
    validate_names("workflow step", steps.iter().map(|s| s.name.as_str()), false)?;
    let known_policies: BTreeSet<&str> = spec.policies.iter().map(|p| p.name.as_str()).collect();
    let mut workflow = Vec::with_capacity(steps.len());
    for step in steps {
        let def = definitions
            .step(&step.type_name)
            .ok_or_else(|| RenderError::DefinitionNotFound {
                kind: DefinitionKind::WorkflowStep,
                name: step.type_name.clone(),
            })?;
        let properties = def
            .parameters
            .resolve(&step.properties)
            .map_err(|e| RenderError::template(format!("workflow step {}", step.name), e))?;
        if step.type_name == DEPLOY_STEP {
            for referenced in string_list(&properties, "policies") {
                if !known_policies.contains(referenced.as_str()) {
                    return Err(RenderError::Validation(format!(
                        "workflow step {} references unknown policy {}",
                        step.name, referenced
                    )));
                }
            }
        }
        workflow.push(RenderedStep {
            name: step.name.clone(),
            type_name: step.type_name.clone(),
            properties,
        });
    }

    debug!(
        app = %app,
        components = components.len(),
        policies = policies.len(),
        steps = workflow.len(),
        "Application rendered"
    );

    Ok(RenderOutput {
        components,
        policies,
        workflow,
    })
}

fn render_component(
    app: &AppId,
    component: &ComponentSpec,
    definitions: &DefinitionSet,
) -> Result<RenderedComponent> {
    let def = definitions
        .component(&component.type_name)
        .ok_or_else(|| RenderError::DefinitionNotFound {
            kind: DefinitionKind::Component,
            name: component.type_name.clone(),
        })?;

    let location = format!("component {}", component.name);
    let parameters = def
        .parameters
        .resolve(&component.properties)
        .map_err(|e| RenderError::template(location.clone(), e))?;
    let context = json!({
        "name": component.name,
        "appName": app.name,
        "namespace": app.namespace,
    });

    let spec = expand(&def.workload.template, &TemplateScope::new(&parameters, &context))
        .map_err(|e| RenderError::template(location.clone(), e))?;
    let mut workload = labelled(
        Manifest::new(&def.workload.api_version, &def.workload.kind, &component.name),
        app,
        &component.name,
    )
    .with_spec(spec);

    let mut seen_traits = BTreeSet::new();
    let mut auxiliaries = Vec::new();
    let mut traits = Vec::with_capacity(component.traits.len());
    for trait_spec in &component.traits {
        if !seen_traits.insert(trait_spec.type_name.as_str()) {
            return Err(RenderError::Validation(format!(
                "component {} has trait {} more than once",
                component.name, trait_spec.type_name
            )));
        }
        let trait_def = definitions
            .trait_def(&trait_spec.type_name)
            .ok_or_else(|| RenderError::DefinitionNotFound {
                kind: DefinitionKind::Trait,
                name: trait_spec.type_name.clone(),
            })?;
        if !trait_def.can_apply_to(&component.type_name) {
            return Err(RenderError::Validation(format!(
                "trait {} cannot be applied to component {} of type {}",
                trait_spec.type_name, component.name, component.type_name
            )));
        }

        let trait_location = format!("trait {} on component {}", trait_spec.type_name, component.name);
        let trait_params = trait_def
            .parameters
            .resolve(&trait_spec.properties)
            .map_err(|e| RenderError::template(trait_location.clone(), e))?;
        let scope = TemplateScope::new(&trait_params, &context);

        if let Some(patch) = &trait_def.patch {
            let expanded =
                expand(patch, &scope).map_err(|e| RenderError::template(trait_location.clone(), e))?;
            merge(&mut workload.spec, &expanded);
        }

        for output in &trait_def.outputs {
            let spec = expand(&output.resource.template, &scope)
                .map_err(|e| RenderError::template(trait_location.clone(), e))?;
            let name = format!("{}-{}", component.name, output.suffix);
            auxiliaries.push(
                labelled(
                    Manifest::new(&output.resource.api_version, &output.resource.kind, name),
                    app,
                    &component.name,
                )
                .with_spec(spec),
            );
        }
        traits.push(trait_spec.type_name.clone());
    }

    Ok(RenderedComponent {
        name: component.name.clone(),
        type_name: component.type_name.clone(),
        workload,
        auxiliaries,
        traits,
    })
}

fn labelled(manifest: Manifest, app: &AppId, component: &str) -> Manifest {
    let manifest = if is_cluster_scoped(&manifest.kind) {
        manifest
    } else {
        manifest.in_namespace(&app.namespace)
    };
    manifest
        .with_label(LABEL_APP_NAME, &app.name)
        .with_label(LABEL_COMPONENT, component)
}

fn is_cluster_scoped(kind: &str) -> bool {
    matches!(
        kind,
        "Namespace" | "CustomResourceDefinition" | "ClusterRole" | "ClusterRoleBinding"
    )
}

fn validate_names<'a>(
    what: &str,
    names: impl Iterator<Item = &'a str>,
    require_label: bool,
) -> Result<()> {
    let mut seen = BTreeSet::new();
    for name in names {
        if name.is_empty() {
            return Err(RenderError::Validation(format!("{} name must not be empty", what)));
        }
        if require_label && !is_dns_label(name) {
            return Err(RenderError::Validation(format!(
                "{} name {:?} must be a lowercase DNS label",
                what, name
            )));
        }
        if !seen.insert(name) {
            return Err(RenderError::Validation(format!(
                "duplicate {} name {}",
                what, name
            )));
        }
    }
    Ok(())
}

fn is_dns_label(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() <= 63
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes.first().is_some_and(u8::is_ascii_alphanumeric)
        && bytes.last().is_some_and(u8::is_ascii_alphanumeric)
}

fn check_resource_identities(components: &[RenderedComponent]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for component in components {
        for manifest in component.manifests() {
            if !seen.insert(manifest.key()) {
                return Err(RenderError::Validation(format!(
                    "resource {} is rendered more than once (component {})",
                    manifest.key(),
                    component.name
                )));
            }
        }
    }
    Ok(())
}

fn check_topology_components(
    policy: &str,
    properties: &Value,
    known: &BTreeSet<&str>,
) -> Result<()> {
    for component in string_list(properties, "components") {
        if !known.contains(component.as_str()) {
            return Err(RenderError::Validation(format!(
                "topology policy {} selects unknown component {}",
                policy, component
            )));
        }
    }
    Ok(())
}

fn string_list(properties: &Value, field: &str) -> Vec<String> {
    properties
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
