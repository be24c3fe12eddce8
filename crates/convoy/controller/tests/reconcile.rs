//! End-to-end reconciliation against in-memory stores and clusters

use async_trait::async_trait;
use convoy_controller::{
    reason, ApplicationStore, Controller, ControllerBuilder, ControllerConfig,
    InMemoryApplicationStore, ReconcilePhase, RecordingEventSink, Requeue,
};
use convoy_dispatch::{
    ApplyError, ApplyOutcome, InMemoryClusterRegistry, InMemoryFleet, ResourceApplier,
};
use convoy_render::{standard_definitions, DefinitionStore, TemplateRenderer};
use convoy_revision::{cluster_pin, InMemoryRevisionStore, RevisionStore, PIN_ROLLOUT};
use convoy_types::{
    AppId, Application, ApplicationPhase, ApplicationSpec, ClusterRef, ComponentSpec,
    ConditionStatus, ConditionType, Manifest, PolicySpec, ResourceKey, RevisionNumber,
    TargetState,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct Harness {
    apps: Arc<InMemoryApplicationStore>,
    revisions: Arc<InMemoryRevisionStore>,
    registry: Arc<InMemoryClusterRegistry>,
    fleet: Arc<InMemoryFleet>,
    events: Arc<RecordingEventSink>,
    controller: Controller,
}

impl Harness {
    fn new(clusters: &[&str]) -> Self {
        Self::with_config(clusters, ControllerConfig::default())
    }

    fn with_config(clusters: &[&str], config: ControllerConfig) -> Self {
        Self::with_applier(clusters, config, |fleet| fleet as Arc<dyn ResourceApplier>)
    }

    /// Build with the fleet wrapped by `applier`
    fn with_applier(
        clusters: &[&str],
        config: ControllerConfig,
        applier: impl FnOnce(Arc<InMemoryFleet>) -> Arc<dyn ResourceApplier>,
    ) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let apps = Arc::new(InMemoryApplicationStore::new());
        let revisions = Arc::new(InMemoryRevisionStore::new());
        let registry = Arc::new(InMemoryClusterRegistry::new());
        for name in clusters {
            registry.register(
                ClusterRef::new(*name, format!("https://{}.example", name)).with_label("env", "prod"),
            );
        }
        let fleet = Arc::new(InMemoryFleet::new());
        let events = Arc::new(RecordingEventSink::new());
        let definitions = Arc::new(DefinitionStore::new(standard_definitions()));

        let controller = ControllerBuilder::new()
            .with_application_store(apps.clone())
            .with_revision_store(revisions.clone())
            .with_renderer(Arc::new(TemplateRenderer::new(definitions)))
            .with_cluster_registry(registry.clone())
            .with_resource_applier(applier(fleet.clone()))
            .with_event_sink(events.clone())
            .with_config(config)
            .build()
            .unwrap();

        Self {
            apps,
            revisions,
            registry,
            fleet,
            events,
            controller,
        }
    }

    async fn app(&self, id: &AppId) -> Application {
        self.apps.get(id).await.unwrap().unwrap()
    }

    async fn revision_numbers(&self, id: &AppId) -> Vec<u64> {
        self.revisions
            .list(id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.number.get())
            .collect()
    }
}

fn web_id() -> AppId {
    AppId::new("default", "web")
}

fn frontend(image: &str) -> ComponentSpec {
    ComponentSpec::new("frontend", "webservice", json!({"image": image}))
}

fn topology(clusters: &[&str]) -> PolicySpec {
    PolicySpec::new("placement", "topology", json!({"clusters": clusters}))
}

fn web_spec(image: &str) -> ApplicationSpec {
    ApplicationSpec::default()
        .with_component(frontend(image))
        .with_policy(topology(&["prod"]))
}

/// Passes applies through to the fleet, recording how many run at once
struct ConcurrencyRecorder {
    fleet: Arc<InMemoryFleet>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl ConcurrencyRecorder {
    fn new(fleet: Arc<InMemoryFleet>) -> Self {
        Self {
            fleet,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ResourceApplier for ConcurrencyRecorder {
    async fn apply(
        &self,
        cluster: &ClusterRef,
        manifest: &Manifest,
    ) -> Result<ApplyOutcome, ApplyError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let result = self.fleet.apply(cluster, manifest).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete(&self, cluster: &ClusterRef, key: &ResourceKey) -> Result<bool, ApplyError> {
        self.fleet.delete(cluster, key).await
    }
}

fn deployment(name: &str) -> ResourceKey {
    ResourceKey {
        api_version: "apps/v1".into(),
        kind: "Deployment".into(),
        namespace: Some("default".into()),
        name: name.into(),
    }
}

#[tokio::test]
async fn test_rollout_new_revision_and_gc() {
    let config = ControllerConfig {
        revision_history_limit: 1,
        ..Default::default()
    };
    let h = Harness::with_config(&["prod"], config);
    let id = web_id();

    let spec = ApplicationSpec::default()
        .with_component(frontend("nginx:1.25"))
        .with_policy(topology(&["prod"]));
    h.apps.apply(id.clone(), spec.clone());

    let outcome = h.controller.reconcile_now(&id).await.unwrap();
    assert_eq!(outcome.phase, ReconcilePhase::Succeeded);
    assert_eq!(outcome.revision.as_deref(), Some("web-v1"));

    let app = h.app(&id).await;
    assert_eq!(app.status.phase, ApplicationPhase::Succeeded);
    assert_eq!(app.status.latest_revision.as_deref(), Some("web-v1"));
    assert_eq!(app.status.observed_generation, 1);
    assert!(app.status.is_condition_true(ConditionType::Dispatched));
    assert_eq!(app.status.cluster("prod").unwrap().state, TargetState::Applied);
    let service = app.status.service("frontend").unwrap();
    assert!(service.healthy);
    assert_eq!(service.component_revision, "frontend-v1");
    assert!(h.fleet.live("prod", &deployment("frontend")).is_some());

    // add a component: new revision, frontend keeps its component revision
    let spec = spec.with_component(ComponentSpec::new(
        "backend",
        "worker",
        json!({"image": "api:2.0"}),
    ));
    h.apps.apply(id.clone(), spec.clone());
    let outcome = h.controller.reconcile_now(&id).await.unwrap();
    assert_eq!(outcome.revision.as_deref(), Some("web-v2"));

    let app = h.app(&id).await;
    assert_eq!(app.status.latest_revision.as_deref(), Some("web-v2"));
    assert_eq!(app.status.service("frontend").unwrap().component_revision, "frontend-v1");
    assert_eq!(app.status.service("backend").unwrap().component_revision, "backend-v1");
    assert!(h.fleet.live("prod", &deployment("backend")).is_some());
    assert_eq!(h.events.count(&id, reason::REVISION_CREATED), 2);

    let pins = h.revisions.pins(&id);
    assert_eq!(pins.get(&cluster_pin("prod")), Some(&RevisionNumber::new(2)));
    assert!(!pins.contains_key(PIN_ROLLOUT));

    // web-v1 is the only unreferenced revision, within the limit of one
    let report = h.controller.collect_garbage(&id).await.unwrap();
    assert!(report.deleted.is_empty());
    assert_eq!(h.revision_numbers(&id).await, vec![1, 2]);

    let spec = ApplicationSpec {
        components: vec![frontend("nginx:1.26")],
        ..spec
    };
    h.apps.apply(id.clone(), spec);
    let outcome = h.controller.reconcile_now(&id).await.unwrap();
    assert_eq!(outcome.revision.as_deref(), Some("web-v3"));

    let report = h.controller.collect_garbage(&id).await.unwrap();
    assert_eq!(report.deleted, vec![RevisionNumber::new(1)]);
    assert_eq!(h.revision_numbers(&id).await, vec![2, 3]);
    // backend was pruned when it left the spec
    assert!(h.fleet.live("prod", &deployment("backend")).is_none());
}

#[tokio::test]
async fn test_partial_failure_reports_degraded() {
    let h = Harness::new(&["cluster-a", "cluster-b", "cluster-c"]);
    let id = web_id();
    h.apps.apply(
        id.clone(),
        ApplicationSpec::default()
            .with_component(frontend("nginx:1.25"))
            .with_policy(PolicySpec::new(
                "placement",
                "topology",
                json!({"clusterLabelSelector": {"env": "prod"}}),
            )),
    );
    h.fleet.fail_cluster("cluster-b", "connection refused");

    let outcome = h.controller.reconcile_now(&id).await.unwrap();
    assert_eq!(outcome.phase, ReconcilePhase::Degraded);
    assert_eq!(outcome.requeue, Requeue::Backoff);
    assert_eq!(h.controller.failures(&id), 1);

    let app = h.app(&id).await;
    assert_eq!(app.status.phase, ApplicationPhase::Degraded);
    assert_eq!(app.status.latest_revision.as_deref(), Some("web-v1"));
    assert_eq!(app.status.cluster("cluster-a").unwrap().state, TargetState::Applied);
    assert_eq!(app.status.cluster("cluster-c").unwrap().state, TargetState::Applied);
    let b = app.status.cluster("cluster-b").unwrap();
    assert_eq!(b.state, TargetState::Failed);
    assert!(b.reason.as_deref().unwrap().contains("connection refused"));
    let dispatched = app.status.condition(ConditionType::Dispatched).unwrap();
    assert_eq!(dispatched.status, ConditionStatus::False);
    assert_eq!(dispatched.reason, "Degraded");
    assert!(!app.status.service("frontend").unwrap().healthy);
    assert_eq!(h.events.count(&id, reason::DEGRADED), 1);

    // the retry reuses web-v1
    h.fleet.heal_cluster("cluster-b");
    let outcome = h.controller.reconcile_now(&id).await.unwrap();
    assert_eq!(outcome.phase, ReconcilePhase::Succeeded);
    assert_eq!(outcome.revision.as_deref(), Some("web-v1"));
    assert_eq!(h.revision_numbers(&id).await, vec![1]);
    assert_eq!(h.controller.failures(&id), 0);
    assert_eq!(h.app(&id).await.status.phase, ApplicationPhase::Succeeded);
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let h = Harness::new(&["prod"]);
    let id = web_id();
    h.apps.apply(
        id.clone(),
        ApplicationSpec::default()
            .with_component(frontend("nginx:1.25"))
            .with_policy(topology(&["prod"])),
    );

    h.controller.reconcile_now(&id).await.unwrap();
    let writes = h.fleet.write_count();
    let status_writes = h.apps.status_writes();

    let outcome = h.controller.reconcile_now(&id).await.unwrap();
    assert_eq!(outcome.phase, ReconcilePhase::Succeeded);
    assert_eq!(outcome.revision.as_deref(), Some("web-v1"));
    assert_eq!(h.fleet.write_count(), writes);
    assert_eq!(h.apps.status_writes(), status_writes);
    assert_eq!(h.revision_numbers(&id).await, vec![1]);
    assert_eq!(h.events.count(&id, reason::REVISION_CREATED), 1);
}

#[tokio::test]
async fn test_drift_is_corrected() {
    let h = Harness::new(&["prod"]);
    let id = web_id();
    h.apps.apply(
        id.clone(),
        ApplicationSpec::default()
            .with_component(frontend("nginx:1.25"))
            .with_policy(topology(&["prod"])),
    );
    h.controller.reconcile_now(&id).await.unwrap();

    assert!(h
        .fleet
        .tamper("prod", &deployment("frontend"), &json!({"replicas": 7})));
    h.controller.reconcile_now(&id).await.unwrap();

    let app = h.app(&id).await;
    assert_eq!(
        app.status.cluster("prod").unwrap().state,
        TargetState::AppliedWithDrift
    );
    let live = h.fleet.live("prod", &deployment("frontend")).unwrap();
    assert_eq!(live.spec.get("replicas"), Some(&Value::from(1)));
}

#[tokio::test]
async fn test_render_failure_creates_no_revision() {
    let h = Harness::new(&[]);
    let id = web_id();
    h.apps.apply(
        id.clone(),
        ApplicationSpec::default().with_component(ComponentSpec::new(
            "fn",
            "lambda",
            json!({}),
        )),
    );

    let outcome = h.controller.reconcile_now(&id).await.unwrap();
    assert_eq!(outcome.phase, ReconcilePhase::RenderFailed);
    assert_eq!(outcome.requeue, Requeue::Never);

    let app = h.app(&id).await;
    assert_eq!(app.status.phase, ApplicationPhase::RenderFailed);
    assert_eq!(app.status.observed_generation, 1);
    let rendered = app.status.condition(ConditionType::Rendered).unwrap();
    assert_eq!(rendered.status, ConditionStatus::False);
    assert_eq!(rendered.reason, "RenderFailed");
    assert!(rendered.message.contains("DefinitionNotFound"));
    assert!(h.revision_numbers(&id).await.is_empty());
    assert_eq!(h.events.count(&id, reason::RENDER_FAILED), 1);
}

#[tokio::test]
async fn test_invalid_topology_fails_without_retry() {
    let h = Harness::new(&["prod"]);
    let id = web_id();
    h.apps.apply(
        id.clone(),
        ApplicationSpec::default()
            .with_component(frontend("nginx:1.25"))
            .with_policy(PolicySpec::new("placement", "topology", json!({}))),
    );

    let outcome = h.controller.reconcile_now(&id).await.unwrap();
    assert_eq!(outcome.phase, ReconcilePhase::Failed);
    assert_eq!(outcome.requeue, Requeue::Never);

    let app = h.app(&id).await;
    assert_eq!(app.status.phase, ApplicationPhase::Failed);
    assert_eq!(
        app.status.condition(ConditionType::Dispatched).unwrap().reason,
        "PlacementFailed"
    );
    assert!(!h.revisions.pins(&id).contains_key(PIN_ROLLOUT));
    assert_eq!(h.events.count(&id, reason::PLACEMENT_FAILED), 1);
}

#[tokio::test]
async fn test_repeated_transient_failures_report_stalled() {
    let mut config = ControllerConfig::default();
    config.backoff.stalled_threshold = 2;
    let h = Harness::with_config(&["prod"], config);
    let id = web_id();
    h.apps.apply(
        id.clone(),
        ApplicationSpec::default()
            .with_component(frontend("nginx:1.25"))
            .with_policy(topology(&["prod"])),
    );
    h.registry.set_unavailable(true);

    let outcome = h.controller.reconcile_now(&id).await.unwrap();
    assert_eq!(outcome.phase, ReconcilePhase::ApplyingRetry);
    assert_eq!(outcome.requeue, Requeue::Backoff);
    assert!(!h.app(&id).await.status.is_condition_true(ConditionType::Stalled));

    h.controller.reconcile_now(&id).await.unwrap();
    assert_eq!(h.controller.failures(&id), 2);
    assert!(h.app(&id).await.status.is_condition_true(ConditionType::Stalled));
    assert_eq!(h.events.count(&id, reason::STALLED), 1);
    assert_eq!(h.events.count(&id, reason::RECONCILE_ERROR), 2);

    h.registry.set_unavailable(false);
    h.controller.reconcile_now(&id).await.unwrap();
    let app = h.app(&id).await;
    assert_eq!(app.status.phase, ApplicationPhase::Succeeded);
    assert!(!app.status.is_condition_true(ConditionType::Stalled));
}

#[tokio::test]
async fn test_cluster_leaving_placement_is_released() {
    let h = Harness::new(&["cluster-a", "cluster-b"]);
    let id = web_id();
    let spec = ApplicationSpec::default().with_component(frontend("nginx:1.25"));
    h.apps.apply(
        id.clone(),
        spec.clone().with_policy(topology(&["cluster-a", "cluster-b"])),
    );
    h.controller.reconcile_now(&id).await.unwrap();
    assert!(h.fleet.live("cluster-b", &deployment("frontend")).is_some());

    h.apps
        .apply(id.clone(), spec.with_policy(topology(&["cluster-a"])));
    let outcome = h.controller.reconcile_now(&id).await.unwrap();
    assert_eq!(outcome.revision.as_deref(), Some("web-v2"));

    assert!(h.fleet.resources("cluster-b").is_empty());
    assert!(h.fleet.live("cluster-a", &deployment("frontend")).is_some());
    assert!(!h.revisions.pins(&id).contains_key(&cluster_pin("cluster-b")));
    assert_eq!(h.events.count(&id, reason::CLUSTER_RELEASED), 1);
    assert!(h.app(&id).await.status.cluster("cluster-b").is_none());
}

#[tokio::test]
async fn test_deletion_cleans_up_everything() {
    let h = Harness::new(&["prod"]);
    let id = web_id();
    h.apps.apply(
        id.clone(),
        ApplicationSpec::default()
            .with_component(frontend("nginx:1.25"))
            .with_policy(topology(&["prod"])),
    );
    h.controller.reconcile_now(&id).await.unwrap();
    assert!(!h.fleet.resources("prod").is_empty());

    assert!(h.apps.request_deletion(&id));
    let outcome = h.controller.reconcile_now(&id).await.unwrap();
    assert_eq!(outcome.phase, ReconcilePhase::Deleting);

    assert!(!h.apps.contains(&id));
    assert!(h.fleet.resources("prod").is_empty());
    assert!(h.revision_numbers(&id).await.is_empty());
    assert_eq!(h.events.count(&id, reason::DELETED), 1);

    // a vanished application is a no-op
    let outcome = h.controller.reconcile_now(&id).await.unwrap();
    assert_eq!(outcome.requeue, Requeue::Never);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_workers_converge_on_latest_spec() {
    let h = Harness::new(&["prod"]);
    let web = web_id();
    let api = AppId::new("team-b", "api");
    h.controller.start().await.unwrap();

    for i in 0..10 {
        for id in [&web, &api] {
            h.apps.apply(
                id.clone(),
                ApplicationSpec::default()
                    .with_component(frontend(&format!("nginx:1.{}", i)))
                    .with_policy(topology(&["prod"])),
            );
            h.controller.enqueue(id.clone());
        }
        tokio::task::yield_now().await;
    }

    assert!(h.controller.wait_idle(Duration::from_secs(10)).await);

    for id in [&web, &api] {
        let app = h.app(id).await;
        assert_eq!(app.status.phase, ApplicationPhase::Succeeded);
        assert_eq!(app.status.observed_generation, app.generation);

        let latest = h.revisions.get_latest(id).await.unwrap().unwrap();
        assert_eq!(latest.generation, app.generation);
        assert_eq!(
            app.status.latest_revision.as_deref(),
            Some(latest.name().as_str())
        );
        let numbers = h.revision_numbers(id).await;
        assert!(numbers.len() <= 10);
        assert!(numbers.windows(2).all(|w| w[0] < w[1]));
    }

    let live = h.fleet.live("prod", &deployment("frontend")).unwrap();
    assert!(live.spec.to_string().contains("nginx:1.9"));
    h.controller.shutdown().await;
    assert!(h.controller.reconcile_now(&web).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_application_never_reconciles_concurrently() {
    let mut recorder = None;
    let config = ControllerConfig {
        workers: 4,
        ..Default::default()
    };
    let h = Harness::with_applier(&["prod"], config, |fleet| {
        let applier = Arc::new(ConcurrencyRecorder::new(fleet));
        recorder = Some(applier.clone());
        applier as Arc<dyn ResourceApplier>
    });
    let recorder = recorder.unwrap();
    let id = web_id();
    h.controller.start().await.unwrap();

    // one cluster and one component: each reconcile makes exactly one apply
    for i in 0..10 {
        h.apps.apply(id.clone(), web_spec(&format!("nginx:1.{}", i)));
        h.controller.enqueue(id.clone());
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(h.controller.wait_idle(Duration::from_secs(10)).await);

    assert!(recorder.calls.load(Ordering::SeqCst) >= 2);
    assert_eq!(recorder.peak.load(Ordering::SeqCst), 1);

    let app = h.app(&id).await;
    assert_eq!(app.status.observed_generation, app.generation);
    let live = h.fleet.live("prod", &deployment("frontend")).unwrap();
    assert!(live.spec.to_string().contains("nginx:1.9"));
    h.controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_deletion_during_dispatch_finalizes() {
    let h = Harness::new(&["prod"]);
    let id = web_id();
    h.apps.apply(id.clone(), web_spec("nginx:1.25"));
    h.fleet.delay_cluster("prod", Duration::from_secs(10));

    let (outcome, requested) = tokio::join!(h.controller.reconcile_now(&id), async {
        // lands while the apply to prod is in flight
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.apps.request_deletion(&id)
    });
    assert!(requested);
    let outcome = outcome.unwrap();
    assert_eq!(outcome.phase, ReconcilePhase::Deleting);
    assert_eq!(outcome.requeue, Requeue::Never);

    assert!(!h.apps.contains(&id));
    assert!(h.fleet.resources("prod").is_empty());
    assert!(h.revision_numbers(&id).await.is_empty());
    assert!(h.revisions.pins(&id).is_empty());
    assert_eq!(h.events.count(&id, reason::DELETED), 1);
    assert_eq!(h.events.count(&id, reason::APPLIED), 0);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_enqueues_keep_one_resync_timer() {
    let config = ControllerConfig {
        resync_interval_secs: 10,
        ..Default::default()
    };
    let h = Harness::with_config(&["prod"], config);
    let id = web_id();
    h.apps.apply(id.clone(), web_spec("nginx:1.25"));
    h.controller.start().await.unwrap();

    for _ in 0..4 {
        h.controller.enqueue(id.clone());
        assert!(h.controller.wait_idle(Duration::from_secs(1)).await);
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    let before = h.events.count(&id, reason::APPLIED);
    assert_eq!(before, 4);

    // roughly 9.5 resync intervals after the last reconcile
    tokio::time::sleep(Duration::from_secs(93)).await;
    let resyncs = h.events.count(&id, reason::APPLIED) - before;
    assert!((9..=10).contains(&resyncs), "{} resyncs", resyncs);

    h.controller.shutdown().await;
}
