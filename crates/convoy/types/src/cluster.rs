//! Target execution clusters

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the built-in control-plane cluster
pub const LOCAL_CLUSTER: &str = "local";

/// Reference to a remote execution context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRef {
    pub name: String,
    /// Connectivity handle, opaque to the engine
    pub endpoint: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ClusterRef {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn local() -> Self {
        Self::new(LOCAL_CLUSTER, "in-cluster")
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// True when every selector entry matches a label on this cluster
    pub fn matches(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|l| l == v))
    }
}

impl fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster:{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_selector() {
        let cluster = ClusterRef::new("prod-eu", "https://eu")
            .with_label("env", "prod")
            .with_label("region", "eu");

        let mut selector = BTreeMap::new();
        selector.insert("env".to_string(), "prod".to_string());
        assert!(cluster.matches(&selector));

        selector.insert("region".to_string(), "us".to_string());
        assert!(!cluster.matches(&selector));

        assert!(cluster.matches(&BTreeMap::new()));
    }
}
