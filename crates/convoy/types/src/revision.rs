//! Immutable revision snapshots

use crate::ids::{AppId, RevisionNumber};
use crate::render::RenderOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Hex-encoded content hash of a render output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of one component inside an application revision.
///
/// The number only advances when the component's rendered content changes, so
/// unrelated edits to sibling components do not churn it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRevision {
    pub component: String,
    pub number: u64,
    pub hash: Fingerprint,
}

impl ComponentRevision {
    /// e.g. `frontend-v2`
    pub fn name(&self) -> String {
        format!("{}-v{}", self.component, self.number)
    }
}

/// Immutable snapshot of a fully rendered Application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRevision {
    pub app: AppId,
    pub number: RevisionNumber,
    pub fingerprint: Fingerprint,
    /// Application generation this revision was rendered from
    pub generation: u64,
    pub render: RenderOutput,
    pub component_revisions: BTreeMap<String, ComponentRevision>,
    pub created_at: DateTime<Utc>,
}

impl ApplicationRevision {
    pub fn name(&self) -> String {
        self.app.revision_name(self.number)
    }

    pub fn component_revision(&self, component: &str) -> Option<&ComponentRevision> {
        self.component_revisions.get(component)
    }
}
