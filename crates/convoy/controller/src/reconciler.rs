//! Reconciler: one observe, converge and report pass for one Application
//!
//! Drives renderer, revision store and dispatcher in order and translates the
//! result into status conditions, events and a requeue decision.

use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result, StoreError};
use crate::events::{reason, Event, EventSink};
use crate::gc::GcSignal;
use crate::state::{ReconcilePhase, ReconcileState};
use crate::store::ApplicationStore;
use convoy_dispatch::{
    resolve_placement, ClusterRegistry, DispatchAggregate, DispatchReport, Dispatcher,
    PlacementDecision,
};
use convoy_render::{RenderError, Renderer};
use convoy_revision::{
    cluster_pin, fingerprint, RevisionDraft, RevisionError, RevisionStore, PIN_ROLLOUT,
    PIN_STATUS,
};
use convoy_types::{
    AppId, Application, ApplicationPhase, ApplicationRevision, ApplicationStatus, ClusterStatus,
    Condition, ConditionStatus, ConditionType, Fingerprint, RenderOutput, ServiceStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Status writes retried this many times on resource-version conflicts
const STATUS_WRITE_ATTEMPTS: usize = 3;

/// What the worker should do with the key after a reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Wait for the next edit
    Never,
    /// Converged; look again after the resync interval
    After(Duration),
    /// Retry with exponential backoff
    Backoff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Phase the attempt settled in
    pub phase: ReconcilePhase,
    /// Name of the revision rolled out, if the attempt got that far
    pub revision: Option<String>,
    pub requeue: Requeue,
}

impl ReconcileOutcome {
    fn new(phase: ReconcilePhase, revision: Option<String>, requeue: Requeue) -> Self {
        Self {
            phase,
            revision,
            requeue,
        }
    }
}

pub struct Reconciler {
    pub(crate) apps: Arc<dyn ApplicationStore>,
    pub(crate) revisions: Arc<dyn RevisionStore>,
    pub(crate) renderer: Arc<dyn Renderer>,
    pub(crate) registry: Arc<dyn ClusterRegistry>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) gc: GcSignal,
    pub(crate) config: ControllerConfig,
}

impl Reconciler {
    /// Reconcile `id` once. `failures` is the number of consecutive failed
    /// attempts before this one.
    ///
    /// Transient errors are absorbed into a `Backoff` outcome; only errors
    /// that retrying cannot fix are returned.
    #[instrument(skip(self, id), fields(app = %id))]
    pub async fn reconcile(&self, id: &AppId, failures: u32) -> Result<ReconcileOutcome> {
        let mut state = ReconcileState::new(id.clone(), failures);
        match self.run(&mut state).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_transient() => {
                self.record_transient_failure(id, &e, failures).await;
                Ok(ReconcileOutcome::new(
                    ReconcilePhase::ApplyingRetry,
                    None,
                    Requeue::Backoff,
                ))
            }
            Err(e) => {
                warn!(error = %e, phase = %state.phase(), "Reconcile abandoned");
                self.events
                    .emit(Event::warning(id, reason::RECONCILE_ERROR, e.to_string()));
                Err(e)
            }
        }
    }

    async fn run(&self, state: &mut ReconcileState) -> Result<ReconcileOutcome> {
        let id = state.app.clone();
        let Some(app) = self.apps.get(&id).await? else {
            debug!("Application no longer exists");
            return Ok(ReconcileOutcome::new(state.phase(), None, Requeue::Never));
        };
        if app.deletion_requested {
            return self.finalize(state).await;
        }

        state.advance(ReconcilePhase::Rendering)?;
        let render = match self.renderer.render(&app) {
            Ok(render) => render,
            Err(e) => return self.render_failed(state, &app, e).await,
        };

        state.advance(ReconcilePhase::Diffing)?;
        let (revision, created) = self.ensure_revision(state, &app, render).await?;
        state.revision = Some(revision.number);
        if created {
            info!(revision = %revision.name(), "Revision created");
            self.events.emit(Event::normal(
                &id,
                reason::REVISION_CREATED,
                format!("Created revision {}", revision.name()),
            ));
        }

        if self.deletion_requested(&id).await? {
            self.revisions.unpin(&id, PIN_ROLLOUT).await?;
            return self.finalize(state).await;
        }

        let placement = match resolve_placement(&revision.render, self.registry.as_ref()).await {
            Ok(placement) => placement,
            Err(e) => {
                self.revisions.unpin(&id, PIN_ROLLOUT).await?;
                if e.is_transient() {
                    return Err(e.into());
                }
                return self.placement_failed(state, &app, &revision, e.to_string()).await;
            }
        };

        state.advance(ReconcilePhase::Applying)?;
        let report = self.dispatcher.apply(&id, &revision, &placement).await;
        state.aggregate = Some(report.aggregate);

        if self.deletion_requested(&id).await? {
            self.revisions.unpin(&id, PIN_ROLLOUT).await?;
            return self.finalize(state).await;
        }

        self.settle(state, &app, &revision, &placement, &report).await
    }

    /// Reuse the latest revision when the render is unchanged, otherwise create
    /// the next one. The returned revision is pinned as the rollout.
    async fn ensure_revision(
        &self,
        state: &mut ReconcileState,
        app: &Application,
        render: RenderOutput,
    ) -> Result<(ApplicationRevision, bool)> {
        let id = &app.id;
        let current = fingerprint(&render);

        if let Some(latest) = self.reusable(id, &current).await? {
            state.advance(ReconcilePhase::NoChange)?;
            debug!(revision = %latest.name(), "Render unchanged");
            return Ok((latest, false));
        }

        state.advance(ReconcilePhase::Revising)?;
        let draft = RevisionDraft {
            generation: app.generation,
            render,
        };
        let observed = self.revisions.latest_number(id).await?;
        match self.revisions.create_next(id, observed, draft.clone()).await {
            Ok(revision) => Ok((revision, true)),
            Err(RevisionError::Conflict { .. }) => {
                warn!(observed = %observed, "Revision number taken, retrying once");
                if let Some(latest) = self.reusable(id, &current).await? {
                    return Ok((latest, false));
                }
                let observed = self.revisions.latest_number(id).await?;
                let revision = self.revisions.create_next(id, observed, draft).await?;
                Ok((revision, true))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Latest revision, pinned as rollout, if its fingerprint matches
    async fn reusable(
        &self,
        id: &AppId,
        current: &Fingerprint,
    ) -> Result<Option<ApplicationRevision>> {
        match self.revisions.get_latest(id).await? {
            Some(latest) if &latest.fingerprint == current => {
                self.revisions.pin(id, PIN_ROLLOUT, latest.number).await?;
                Ok(Some(latest))
            }
            _ => Ok(None),
        }
    }

    /// Record the dispatch result: status, pins, events and GC signal.
    async fn settle(
        &self,
        state: &mut ReconcileState,
        app: &Application,
        revision: &ApplicationRevision,
        placement: &PlacementDecision,
        report: &DispatchReport,
    ) -> Result<ReconcileOutcome> {
        let id = &app.id;
        let aggregate = report.aggregate;
        let reached_degraded = aggregate >= DispatchAggregate::Degraded;
        let stalled = aggregate != DispatchAggregate::Succeeded
            && state.retries + 1 >= self.config.backoff.stalled_threshold;
        let was_stalled = app.status.is_condition_true(ConditionType::Stalled);

        let name = revision.name();
        let generation = app.generation;
        let clusters: Vec<ClusterStatus> = report
            .targets
            .iter()
            .map(|t| ClusterStatus {
                cluster: t.cluster.clone(),
                state: t.outcome.state(),
                revision: name.clone(),
                reason: t.outcome.reason().map(str::to_string),
            })
            .collect();
        let services = service_statuses(revision, placement, report);
        let dispatched = dispatched_condition(&name, report);
        let phase = match aggregate {
            DispatchAggregate::Succeeded => ApplicationPhase::Succeeded,
            DispatchAggregate::Degraded => ApplicationPhase::Degraded,
            DispatchAggregate::Failed => ApplicationPhase::Failed,
        };
        let failures = state.retries + 1;

        self.write_status(id, |status| {
            status.phase = phase;
            status.observed_generation = generation;
            if reached_degraded {
                status.latest_revision = Some(name.clone());
            }
            status.set_condition(Condition::new(
                ConditionType::Rendered,
                ConditionStatus::True,
                "Rendered",
                "",
            ));
            status.set_condition(Condition::new(
                ConditionType::Revisioned,
                ConditionStatus::True,
                "Revisioned",
                name.clone(),
            ));
            status.set_condition(dispatched.clone());
            status.set_condition(if stalled {
                Condition::new(
                    ConditionType::Stalled,
                    ConditionStatus::True,
                    "RetriesExhausted",
                    format!("{} consecutive failed attempts, still retrying", failures),
                )
            } else {
                Condition::new(ConditionType::Stalled, ConditionStatus::False, "Progressing", "")
            });
            status.clusters = clusters.clone();
            status.services = services.clone();
        })
        .await?;

        // Pins move only after status is written, so every revision status
        // refers to stays pinned throughout.
        for cluster in report.succeeded() {
            self.revisions
                .pin(id, &cluster_pin(cluster), revision.number)
                .await?;
        }
        for cluster in &report.released {
            self.revisions.unpin(id, &cluster_pin(cluster)).await?;
        }
        if reached_degraded {
            self.revisions.pin(id, PIN_STATUS, revision.number).await?;
        }
        self.revisions.unpin(id, PIN_ROLLOUT).await?;

        self.emit_dispatch_events(id, &name, report);
        if stalled && !was_stalled {
            self.events.emit(Event::warning(
                id,
                reason::STALLED,
                format!("{} consecutive failed attempts", failures),
            ));
        }
        self.gc.signal(id);

        let settled = ReconcilePhase::from_aggregate(aggregate);
        state.advance(settled)?;
        state.advance(ReconcilePhase::Idle)?;
        info!(revision = %name, phase = %settled, "Reconciled");

        let requeue = match (aggregate, self.config.resync_interval()) {
            (DispatchAggregate::Succeeded, Some(interval)) => Requeue::After(interval),
            (DispatchAggregate::Succeeded, None) => Requeue::Never,
            _ => Requeue::Backoff,
        };
        Ok(ReconcileOutcome::new(settled, Some(name), requeue))
    }

    fn emit_dispatch_events(&self, id: &AppId, name: &str, report: &DispatchReport) {
        let applied = report.succeeded().join(", ");
        let failed = report
            .failed()
            .iter()
            .map(|t| format!("{} ({})", t.cluster, t.outcome.reason().unwrap_or("unknown")))
            .collect::<Vec<_>>()
            .join(", ");
        let event = match report.aggregate {
            DispatchAggregate::Succeeded => Event::normal(
                id,
                reason::APPLIED,
                format!("Applied {} to {}", name, applied),
            ),
            DispatchAggregate::Degraded => Event::warning(
                id,
                reason::DEGRADED,
                format!("Applied {} to {}; failed on {}", name, applied, failed),
            ),
            DispatchAggregate::Failed => Event::warning(
                id,
                reason::APPLY_FAILED,
                if failed.is_empty() {
                    format!("No cluster to apply {} to", name)
                } else {
                    format!("Failed to apply {} on {}", name, failed)
                },
            ),
        };
        self.events.emit(event);
        for cluster in &report.released {
            self.events.emit(Event::normal(
                id,
                reason::CLUSTER_RELEASED,
                format!("Removed resources from cluster {}", cluster),
            ));
        }
    }

    async fn render_failed(
        &self,
        state: &mut ReconcileState,
        app: &Application,
        error: RenderError,
    ) -> Result<ReconcileOutcome> {
        state.advance(ReconcilePhase::RenderFailed)?;
        warn!(error = %error, "Render failed");

        let message = format!("{}: {}", error.reason(), error);
        let generation = app.generation;
        self.write_status(&app.id, |status| {
            status.phase = ApplicationPhase::RenderFailed;
            status.observed_generation = generation;
            status.set_condition(Condition::new(
                ConditionType::Rendered,
                ConditionStatus::False,
                "RenderFailed",
                message.clone(),
            ));
        })
        .await?;
        self.events
            .emit(Event::warning(&app.id, reason::RENDER_FAILED, message));

        state.advance(ReconcilePhase::Idle)?;
        Ok(ReconcileOutcome::new(
            ReconcilePhase::RenderFailed,
            None,
            Requeue::Never,
        ))
    }

    async fn placement_failed(
        &self,
        state: &mut ReconcileState,
        app: &Application,
        revision: &ApplicationRevision,
        message: String,
    ) -> Result<ReconcileOutcome> {
        state.advance(ReconcilePhase::Failed)?;
        warn!(error = %message, "Placement failed");

        let generation = app.generation;
        self.write_status(&app.id, |status| {
            status.phase = ApplicationPhase::Failed;
            status.observed_generation = generation;
            status.set_condition(Condition::new(
                ConditionType::Dispatched,
                ConditionStatus::False,
                "PlacementFailed",
                message.clone(),
            ));
        })
        .await?;
        self.events
            .emit(Event::warning(&app.id, reason::PLACEMENT_FAILED, message));

        state.advance(ReconcilePhase::Idle)?;
        Ok(ReconcileOutcome::new(
            ReconcilePhase::Failed,
            Some(revision.name()),
            Requeue::Never,
        ))
    }

    /// Remove everything the application owns and let it go.
    async fn finalize(&self, state: &mut ReconcileState) -> Result<ReconcileOutcome> {
        let id = state.app.clone();
        state.advance(ReconcilePhase::Deleting)?;
        info!("Cleaning up deleted application");

        self.write_status(&id, |status| status.phase = ApplicationPhase::Deleting)
            .await?;
        let removed = self.dispatcher.cleanup(&id).await?;
        let revisions = self.revisions.delete_all(&id).await?;
        self.apps.release_finalizer(&id).await?;

        self.events.emit(Event::normal(
            &id,
            reason::DELETED,
            format!("Removed {} resources and {} revisions", removed, revisions),
        ));
        state.advance(ReconcilePhase::Idle)?;
        Ok(ReconcileOutcome::new(
            ReconcilePhase::Deleting,
            None,
            Requeue::Never,
        ))
    }

    async fn deletion_requested(&self, id: &AppId) -> Result<bool> {
        Ok(self
            .apps
            .get(id)
            .await?
            .map(|app| app.deletion_requested)
            .unwrap_or(true))
    }

    async fn record_transient_failure(&self, id: &AppId, error: &ControllerError, failures: u32) {
        let failures = failures + 1;
        warn!(error = %error, failures, "Reconcile failed, retrying with backoff");
        self.events
            .emit(Event::warning(id, reason::RECONCILE_ERROR, error.to_string()));

        if failures < self.config.backoff.stalled_threshold {
            return;
        }
        let message = format!("{} consecutive failed attempts: {}", failures, error);
        let result = self
            .write_status(id, |status| {
                status.set_condition(Condition::new(
                    ConditionType::Stalled,
                    ConditionStatus::True,
                    "RetriesExhausted",
                    message.clone(),
                ));
            })
            .await;
        match result {
            Ok(true) => self
                .events
                .emit(Event::warning(id, reason::STALLED, message)),
            Ok(false) => {}
            Err(e) => debug!(error = %e, "Could not record stalled condition"),
        }
    }

    /// Re-read the application, apply `update` to its status and write it
    /// back if anything changed. Returns whether a write happened.
    async fn write_status<F>(&self, id: &AppId, update: F) -> Result<bool>
    where
        F: Fn(&mut ApplicationStatus),
    {
        for attempt in 1..=STATUS_WRITE_ATTEMPTS {
            let Some(app) = self.apps.get(id).await? else {
                return Ok(false);
            };
            let mut status = app.status.clone();
            update(&mut status);
            if status == app.status {
                return Ok(false);
            }
            match self
                .apps
                .update_status(id, app.resource_version, status)
                .await
            {
                Ok(_) => return Ok(true),
                Err(StoreError::Conflict { .. }) if attempt < STATUS_WRITE_ATTEMPTS => {
                    debug!(attempt, "Status write conflict, re-reading");
                }
                Err(StoreError::NotFound(_)) => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }
}

fn dispatched_condition(name: &str, report: &DispatchReport) -> Condition {
    match report.aggregate {
        DispatchAggregate::Succeeded => Condition::new(
            ConditionType::Dispatched,
            ConditionStatus::True,
            "Succeeded",
            format!("{} applied to {} cluster(s)", name, report.targets.len()),
        ),
        DispatchAggregate::Degraded => Condition::new(
            ConditionType::Dispatched,
            ConditionStatus::False,
            "Degraded",
            format!(
                "{} applied to {} of {} cluster(s)",
                name,
                report.succeeded().len(),
                report.targets.len()
            ),
        ),
        DispatchAggregate::Failed => Condition::new(
            ConditionType::Dispatched,
            ConditionStatus::False,
            "Failed",
            format!("{} was not applied to any cluster", name),
        ),
    }
}

fn service_statuses(
    revision: &ApplicationRevision,
    placement: &PlacementDecision,
    report: &DispatchReport,
) -> Vec<ServiceStatus> {
    revision
        .render
        .components
        .iter()
        .map(|component| {
            let placed = placement.clusters_for(&component.name);
            let mut healthy_on = Vec::new();
            let mut failures = Vec::new();
            for cluster in &placed {
                match report.target(cluster) {
                    Some(t) if t.outcome.is_success() => healthy_on.push(cluster.clone()),
                    Some(t) => failures.push(format!(
                        "{}: {}",
                        cluster,
                        t.outcome.reason().unwrap_or("failed")
                    )),
                    None => failures.push(format!("{}: not dispatched", cluster)),
                }
            }
            ServiceStatus {
                name: component.name.clone(),
                component_revision: revision
                    .component_revision(&component.name)
                    .map(|r| r.name())
                    .unwrap_or_default(),
                healthy: !placed.is_empty() && failures.is_empty(),
                clusters: healthy_on,
                message: (!failures.is_empty()).then(|| failures.join("; ")),
            }
        })
        .collect()
}
