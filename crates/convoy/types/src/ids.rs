//! Strongly-typed identifiers for Convoy entities
//!
//! Applications are addressed by namespace + name, revisions by a per-application
//! monotonic number. Both are wrapped in newtypes so they cannot be mixed up.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an Application (namespace + name)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppId {
    pub namespace: String,
    pub name: String,
}

impl AppId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Name of the application revision with the given number, e.g. `web-v3`
    pub fn revision_name(&self, number: RevisionNumber) -> String {
        format!("{}-v{}", self.name, number.get())
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Per-application revision number, starting at 1
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RevisionNumber(u64);

impl RevisionNumber {
    /// Sentinel for "nothing allocated yet"
    pub const ZERO: RevisionNumber = RevisionNumber(0);

    pub fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RevisionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse the number out of a revision name such as `web-v12`.
pub fn parse_revision_name(app: &AppId, revision_name: &str) -> Option<RevisionNumber> {
    revision_name
        .strip_prefix(app.name.as_str())
        .and_then(|rest| rest.strip_prefix("-v"))
        .and_then(|n| n.parse::<u64>().ok())
        .map(RevisionNumber)
}
