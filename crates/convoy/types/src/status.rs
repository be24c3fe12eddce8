//! Observed status of an Application
//!
//! Conditions follow the usual controller convention: one entry per type, and
//! `last_transition_time` only moves when the condition's status flips.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse lifecycle phase reported on the Application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplicationPhase {
    #[default]
    Pending,
    Rendering,
    RenderFailed,
    Applying,
    Succeeded,
    Degraded,
    Failed,
    Deleting,
}

impl fmt::Display for ApplicationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplicationPhase::Pending => "pending",
            ApplicationPhase::Rendering => "rendering",
            ApplicationPhase::RenderFailed => "renderFailed",
            ApplicationPhase::Applying => "applying",
            ApplicationPhase::Succeeded => "succeeded",
            ApplicationPhase::Degraded => "degraded",
            ApplicationPhase::Failed => "failed",
            ApplicationPhase::Deleting => "deleting",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// The spec rendered successfully against the current definitions
    Rendered,
    /// A revision exists for the current render
    Revisioned,
    /// Every placement target accepted the current revision
    Dispatched,
    /// Reconciliation keeps failing transiently and is still being retried
    Stalled,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Outcome of dispatching to one target cluster, as shown on status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetState {
    Applied,
    AppliedWithDrift,
    Failed,
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Per-cluster dispatch status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub cluster: String,
    pub state: TargetState,
    /// Revision name that was dispatched to this cluster
    pub revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Per-component applied state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub name: String,
    /// Component revision currently dispatched, e.g. `frontend-v2`
    pub component_revision: String,
    /// True when every cluster the component was placed on accepted it
    pub healthy: bool,
    pub clusters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    pub phase: ApplicationPhase,

    /// Generation of the spec this status describes
    pub observed_generation: u64,

    /// Name of the revision currently applied, e.g. `web-v2`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_revision: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub services: Vec<ServiceStatus>,

    #[serde(default)]
    pub clusters: Vec<ClusterStatus>,
}

impl ApplicationStatus {
    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    pub fn is_condition_true(&self, condition_type: ConditionType) -> bool {
        self.condition(condition_type).is_some_and(Condition::is_true)
    }

    /// Insert or update a condition. The transition time is kept when the
    /// status value did not change.
    pub fn set_condition(&mut self, condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => {
                if existing.status != condition.status {
                    existing.last_transition_time = condition.last_transition_time;
                }
                existing.status = condition.status;
                existing.reason = condition.reason;
                existing.message = condition.message;
            }
            None => self.conditions.push(condition),
        }
    }

    pub fn cluster(&self, name: &str) -> Option<&ClusterStatus> {
        self.clusters.iter().find(|c| c.cluster == name)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceStatus> {
        self.services.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_keeps_transition_time_when_status_unchanged() {
        let mut status = ApplicationStatus::default();
        status.set_condition(Condition::new(
            ConditionType::Rendered,
            ConditionStatus::True,
            "Rendered",
            "first",
        ));
        let first = status.conditions[0].last_transition_time;

        status.set_condition(Condition::new(
            ConditionType::Rendered,
            ConditionStatus::True,
            "Rendered",
            "second",
        ));

        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].message, "second");
        assert_eq!(status.conditions[0].last_transition_time, first);
    }

    #[test]
    fn test_set_condition_moves_transition_time_on_flip() {
        let mut status = ApplicationStatus::default();
        let mut old = Condition::new(ConditionType::Stalled, ConditionStatus::False, "Ok", "");
        old.last_transition_time = Utc::now() - chrono::Duration::minutes(5);
        let old_time = old.last_transition_time;
        status.set_condition(old);

        status.set_condition(Condition::new(
            ConditionType::Stalled,
            ConditionStatus::True,
            "Stalled",
            "retrying",
        ));

        assert!(status.is_condition_true(ConditionType::Stalled));
        assert!(status.conditions[0].last_transition_time > old_time);
    }
}
