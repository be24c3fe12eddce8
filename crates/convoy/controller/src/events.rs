//! Event sink
//!
//! Events are human-readable notifications about an application. Emitting is
//! fire-and-forget: a sink must never block the reconcile that emits.

use chrono::{DateTime, Utc};
use convoy_types::AppId;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};
use uuid::Uuid;

/// Reasons attached to emitted events
pub mod reason {
    pub const RENDER_FAILED: &str = "RenderFailed";
    pub const REVISION_CREATED: &str = "RevisionCreated";
    pub const APPLIED: &str = "Applied";
    pub const DEGRADED: &str = "Degraded";
    pub const APPLY_FAILED: &str = "ApplyFailed";
    pub const PLACEMENT_FAILED: &str = "PlacementFailed";
    pub const CLUSTER_RELEASED: &str = "ClusterReleased";
    pub const RECONCILE_ERROR: &str = "ReconcileError";
    pub const STALLED: &str = "Stalled";
    pub const GC_FAILED: &str = "RevisionGCFailed";
    pub const DELETED: &str = "Deleted";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub app: AppId,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        app: &AppId,
        event_type: EventType,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            app: app.clone(),
            event_type,
            reason: reason.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn normal(app: &AppId, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(app, EventType::Normal, reason, message)
    }

    pub fn warning(app: &AppId, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(app, EventType::Warning, reason, message)
    }
}

/// Receiver of application events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: Event) {
        match event.event_type {
            EventType::Normal => info!(
                app = %event.app,
                reason = %event.reason,
                "{}", event.message
            ),
            EventType::Warning => warn!(
                app = %event.app,
                reason = %event.reason,
                "{}", event.message
            ),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reasons of the events emitted for `app`, oldest first
    pub fn reasons(&self, app: &AppId) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| &e.app == app)
            .map(|e| e.reason)
            .collect()
    }

    pub fn count(&self, app: &AppId, reason: &str) -> usize {
        self.reasons(app).iter().filter(|r| *r == reason).count()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
