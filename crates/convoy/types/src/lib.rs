//! Convoy Types - shared data model for the application reconciliation engine
//!
//! This crate defines the resources every other Convoy crate speaks:
//! - Applications (desired spec + observed status)
//! - Render output and the manifests it contains
//! - Immutable application and component revisions
//! - Target cluster references

pub mod application;
pub mod cluster;
pub mod ids;
pub mod manifest;
pub mod merge;
pub mod render;
pub mod revision;
pub mod status;

pub use application::{
    Application, ApplicationSpec, ComponentSpec, PolicySpec, TraitSpec, WorkflowSpec,
    WorkflowStepSpec,
};
pub use cluster::{ClusterRef, LOCAL_CLUSTER};
pub use ids::{parse_revision_name, AppId, RevisionNumber};
pub use manifest::{
    Manifest, ResourceKey, LABEL_APP_NAME, LABEL_COMPONENT, LABEL_COMPONENT_REVISION,
};
pub use render::{RenderOutput, RenderedComponent, RenderedPolicy, RenderedStep};
pub use revision::{ApplicationRevision, ComponentRevision, Fingerprint};
pub use status::{
    ApplicationPhase, ApplicationStatus, ClusterStatus, Condition, ConditionStatus,
    ConditionType, ServiceStatus, TargetState,
};
