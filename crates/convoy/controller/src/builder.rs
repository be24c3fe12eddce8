//! Builder for Controller
//!
//! Wires the application store, revision store, renderer, cluster registry
//! and resource applier into a [`Controller`].

use crate::config::ControllerConfig;
use crate::controller::Controller;
use crate::error::{ControllerError, Result};
use crate::events::{EventSink, TracingEventSink};
use crate::gc::{GcSignal, RevisionCollector};
use crate::reconciler::Reconciler;
use crate::store::ApplicationStore;
use convoy_dispatch::{ClusterRegistry, Dispatcher, ResourceApplier, ResourceTracker};
use convoy_render::Renderer;
use convoy_revision::RevisionStore;
use std::sync::Arc;

/// Builder for constructing a Controller with all dependencies
#[derive(Default)]
pub struct ControllerBuilder {
    application_store: Option<Arc<dyn ApplicationStore>>,
    revision_store: Option<Arc<dyn RevisionStore>>,
    renderer: Option<Arc<dyn Renderer>>,
    cluster_registry: Option<Arc<dyn ClusterRegistry>>,
    resource_applier: Option<Arc<dyn ResourceApplier>>,
    resource_tracker: Option<Arc<ResourceTracker>>,
    event_sink: Option<Arc<dyn EventSink>>,
    config: Option<ControllerConfig>,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application store
    pub fn with_application_store(mut self, store: Arc<dyn ApplicationStore>) -> Self {
        self.application_store = Some(store);
        self
    }

    /// Set the revision store
    pub fn with_revision_store(mut self, store: Arc<dyn RevisionStore>) -> Self {
        self.revision_store = Some(store);
        self
    }

    /// Set the renderer
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Set the cluster registry
    pub fn with_cluster_registry(mut self, registry: Arc<dyn ClusterRegistry>) -> Self {
        self.cluster_registry = Some(registry);
        self
    }

    /// Set the resource applier used to talk to clusters
    pub fn with_resource_applier(mut self, applier: Arc<dyn ResourceApplier>) -> Self {
        self.resource_applier = Some(applier);
        self
    }

    /// Share a resource tracker; a fresh one is created otherwise
    pub fn with_resource_tracker(mut self, tracker: Arc<ResourceTracker>) -> Self {
        self.resource_tracker = Some(tracker);
        self
    }

    /// Set the event sink; events go to `tracing` otherwise
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Set the controller configuration
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the controller. Workers are not running until `start`.
    pub fn build(self) -> Result<Controller> {
        let apps = self.application_store.ok_or_else(|| {
            ControllerError::InvalidRequest("application_store required".into())
        })?;
        let revisions = self
            .revision_store
            .ok_or_else(|| ControllerError::InvalidRequest("revision_store required".into()))?;
        let renderer = self
            .renderer
            .ok_or_else(|| ControllerError::InvalidRequest("renderer required".into()))?;
        let registry = self
            .cluster_registry
            .ok_or_else(|| ControllerError::InvalidRequest("cluster_registry required".into()))?;
        let applier = self.resource_applier.ok_or_else(|| {
            ControllerError::InvalidRequest("resource_applier required".into())
        })?;
        let tracker = self
            .resource_tracker
            .unwrap_or_else(|| Arc::new(ResourceTracker::new()));
        let events = self
            .event_sink
            .unwrap_or_else(|| Arc::new(TracingEventSink));
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let dispatcher = Arc::new(Dispatcher::new(applier, tracker, config.dispatch_config()));
        let (gc, gc_rx) = GcSignal::channel(config.gc_queue_capacity);
        let collector = RevisionCollector::new(revisions.clone(), events.clone(), config.retention());

        let reconciler = Reconciler {
            apps,
            revisions,
            renderer,
            registry,
            dispatcher,
            events,
            gc,
            config,
        };
        Ok(Controller::new(reconciler, collector, gc_rx))
    }
}
