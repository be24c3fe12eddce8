//! Per-attempt reconcile state machine
//!
//! ```text
//! Pending -> Rendering -> RenderFailed | Diffing
//! Diffing -> NoChange | Revising -> Applying
//! Applying -> Succeeded | Degraded | ApplyingRetry | Failed -> Idle
//! Idle -> Rendering
//! any -> Deleting
//! ```

use crate::error::{ControllerError, Result};
use convoy_dispatch::DispatchAggregate;
use convoy_types::{AppId, RevisionNumber};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcilePhase {
    Pending,
    Rendering,
    RenderFailed,
    Diffing,
    NoChange,
    Revising,
    Applying,
    Succeeded,
    Degraded,
    /// A transient failure; the attempt will be retried with backoff
    ApplyingRetry,
    Failed,
    Idle,
    Deleting,
}

impl ReconcilePhase {
    pub fn can_transition_to(&self, next: ReconcilePhase) -> bool {
        use ReconcilePhase::*;
        if next == Deleting {
            return true;
        }
        matches!(
            (*self, next),
            (Pending, Rendering)
                | (Idle, Rendering)
                | (Rendering, RenderFailed)
                | (Rendering, Diffing)
                | (Diffing, NoChange)
                | (Diffing, Revising)
                | (NoChange, Applying)
                | (Revising, Applying)
                | (Applying, Succeeded)
                | (Applying, Degraded)
                | (Applying, Failed)
                | (Diffing | NoChange | Revising | Applying, ApplyingRetry)
                | (NoChange | Revising, Failed)
                | (
                    RenderFailed | Succeeded | Degraded | ApplyingRetry | Failed | Deleting,
                    Idle
                )
        )
    }

    /// Phase that a dispatch aggregate settles in
    pub fn from_aggregate(aggregate: DispatchAggregate) -> Self {
        match aggregate {
            DispatchAggregate::Succeeded => ReconcilePhase::Succeeded,
            DispatchAggregate::Degraded => ReconcilePhase::Degraded,
            DispatchAggregate::Failed => ReconcilePhase::Failed,
        }
    }
}

impl fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Transient state of one reconcile attempt; never persisted
#[derive(Debug, Clone)]
pub struct ReconcileState {
    pub app: AppId,
    phase: ReconcilePhase,
    /// Revision being rolled out by this attempt
    pub revision: Option<RevisionNumber>,
    pub aggregate: Option<DispatchAggregate>,
    /// Consecutive failures before this attempt
    pub retries: u32,
    history: Vec<ReconcilePhase>,
}

impl ReconcileState {
    pub fn new(app: AppId, retries: u32) -> Self {
        Self {
            app,
            phase: ReconcilePhase::Pending,
            revision: None,
            aggregate: None,
            retries,
            history: vec![ReconcilePhase::Pending],
        }
    }

    pub fn phase(&self) -> ReconcilePhase {
        self.phase
    }

    /// Every phase visited, in order
    pub fn history(&self) -> &[ReconcilePhase] {
        &self.history
    }

    pub fn advance(&mut self, next: ReconcilePhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(ControllerError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.history.push(next);
        Ok(())
    }
}
