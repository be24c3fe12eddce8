//! Convoy Render - turns Application specs into concrete resources
//!
//! The renderer resolves every component, trait, policy and workflow step of a
//! spec against a [`DefinitionSet`], expands the definition templates and
//! validates the result. Output is deterministic for identical inputs.

pub mod catalog;
pub mod definition;
pub mod error;
pub mod renderer;
pub mod template;

pub use catalog::standard_definitions;
pub use definition::{
    ComponentDefinition, DefinitionSet, DefinitionStore, ParameterSchema, PolicyDefinition,
    ResourceTemplate, TraitDefinition, TraitOutput, WorkflowStepDefinition, DEPLOY_STEP,
    SUSPEND_STEP, TOPOLOGY_POLICY,
};
pub use error::{DefinitionKind, RenderError, Result, TemplateError};
pub use renderer::{render, Renderer, TemplateRenderer};
