//! Concrete resources produced by rendering and shipped to clusters

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Label carrying the owning application name
pub const LABEL_APP_NAME: &str = "app.oam.dev/name";
/// Label carrying the component name
pub const LABEL_COMPONENT: &str = "app.oam.dev/component";
/// Label carrying the component revision name, stamped at dispatch time
pub const LABEL_COMPONENT_REVISION: &str = "app.oam.dev/component-revision";

/// One rendered resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub spec: Value,
}

impl Manifest {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: None,
            labels: BTreeMap::new(),
            spec: Value::Null,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = spec;
        self
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Apply tier used for dependency ordering within one cluster.
    /// Lower tiers are applied first.
    pub fn apply_tier(&self) -> u8 {
        match self.kind.as_str() {
            "Namespace" | "CustomResourceDefinition" => 0,
            "ServiceAccount" | "ConfigMap" | "Secret" | "PersistentVolumeClaim" => 1,
            "Deployment" | "StatefulSet" | "DaemonSet" | "Job" | "CronJob" => 2,
            _ => 3,
        }
    }
}

/// Identity of a resource inside one cluster
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}
