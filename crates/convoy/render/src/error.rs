//! Render error types

use std::fmt;
use thiserror::Error;

/// Kind of definition a spec can reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    Component,
    Trait,
    Policy,
    WorkflowStep,
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionKind::Component => write!(f, "component"),
            DefinitionKind::Trait => write!(f, "trait"),
            DefinitionKind::Policy => write!(f, "policy"),
            DefinitionKind::WorkflowStep => write!(f, "workflow step"),
        }
    }
}

/// Template expansion failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unbound reference ${{{0}}}")]
    UnboundReference(String),

    #[error("missing required parameter {0:?}")]
    MissingParameter(String),

    #[error("reference ${{{0}}} is not a scalar and cannot be interpolated into a string")]
    NonScalarInterpolation(String),

    #[error("parameters must be an object, got {0}")]
    InvalidParameters(String),

    #[error("malformed placeholder in {0:?}")]
    Malformed(String),
}

/// Render errors. All of them end the current attempt; none of them is
/// permanent for the Application since a later edit can fix the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("{kind} definition not found: {name}")]
    DefinitionNotFound { kind: DefinitionKind, name: String },

    #[error("template expansion failed for {location}: {error}")]
    Template {
        location: String,
        error: TemplateError,
    },

    #[error("validation failed: {0}")]
    Validation(String),
}

impl RenderError {
    /// Short machine-readable reason, used on conditions and events
    pub fn reason(&self) -> &'static str {
        match self {
            RenderError::DefinitionNotFound { .. } => "DefinitionNotFound",
            RenderError::Template { .. } => "TemplateError",
            RenderError::Validation(_) => "ValidationError",
        }
    }

    pub(crate) fn template(location: impl Into<String>, error: TemplateError) -> Self {
        RenderError::Template {
            location: location.into(),
            error,
        }
    }
}

/// Result type for render operations
pub type Result<T> = std::result::Result<T, RenderError>;
