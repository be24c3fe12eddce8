//! Background revision garbage collection
//!
//! Reconciles signal the collector after every rollout; the collector trims
//! revision history off the reconcile path. A full signal channel drops the
//! signal, since the next rollout or resync signals again.

use crate::events::{reason, Event, EventSink};
use convoy_revision::{collect_garbage, GcReport, Retention, RevisionStore};
use convoy_types::AppId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Sending half handed to the reconciler
#[derive(Debug, Clone)]
pub struct GcSignal {
    tx: mpsc::Sender<AppId>,
}

impl GcSignal {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AppId>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn signal(&self, app: &AppId) {
        if let Err(e) = self.tx.try_send(app.clone()) {
            debug!(app = %app, error = %e, "GC signal dropped");
        }
    }
}

pub struct RevisionCollector {
    revisions: Arc<dyn RevisionStore>,
    events: Arc<dyn EventSink>,
    retention: Retention,
}

impl RevisionCollector {
    pub fn new(
        revisions: Arc<dyn RevisionStore>,
        events: Arc<dyn EventSink>,
        retention: Retention,
    ) -> Self {
        Self {
            revisions,
            events,
            retention,
        }
    }

    /// One pass for `app`. Failed deletions surface as a warning event and
    /// are retried on the next pass.
    pub async fn collect(&self, app: &AppId) -> convoy_revision::Result<GcReport> {
        let report = collect_garbage(self.revisions.as_ref(), app, self.retention).await?;
        if !report.deleted.is_empty() {
            debug!(app = %app, deleted = report.deleted.len(), "Revisions collected");
        }
        if !report.is_clean() {
            let failed: Vec<String> = report.failed.iter().map(|n| n.to_string()).collect();
            self.events.emit(Event::warning(
                app,
                reason::GC_FAILED,
                format!("Could not delete revisions {}", failed.join(", ")),
            ));
        }
        Ok(report)
    }

    /// Process signals until every sender is gone
    pub async fn run(&self, mut rx: mpsc::Receiver<AppId>) {
        while let Some(app) = rx.recv().await {
            if let Err(e) = self.collect(&app).await {
                warn!(app = %app, error = %e, "Revision GC failed");
                self.events
                    .emit(Event::warning(&app, reason::GC_FAILED, e.to_string()));
            }
        }
        debug!("Revision collector stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventSink;
    use convoy_revision::{InMemoryRevisionStore, RevisionDraft, PIN_STATUS};
    use convoy_types::{Manifest, RenderOutput, RenderedComponent, RevisionNumber};
    use serde_json::json;

    fn draft(image: &str) -> RevisionDraft {
        RevisionDraft {
            generation: 1,
            render: RenderOutput {
                components: vec![RenderedComponent {
                    name: "frontend".into(),
                    type_name: "webservice".into(),
                    workload: Manifest::new("apps/v1", "Deployment", "frontend")
                        .with_spec(json!({"image": image})),
                    auxiliaries: vec![],
                    traits: vec![],
                }],
                policies: vec![],
                workflow: vec![],
            },
        }
    }

    #[tokio::test]
    async fn test_collector_trims_history() {
        let store = Arc::new(InMemoryRevisionStore::new());
        let events = Arc::new(RecordingEventSink::new());
        let app = AppId::new("default", "web");

        let mut observed = RevisionNumber::ZERO;
        for image in ["a", "b", "c", "d"] {
            observed = store
                .create_next(&app, observed, draft(image))
                .await
                .unwrap()
                .number;
            store.unpin(&app, convoy_revision::PIN_ROLLOUT).await.unwrap();
        }
        store.pin(&app, PIN_STATUS, observed).await.unwrap();

        let collector = RevisionCollector::new(store.clone(), events.clone(), Retention::Limit(1));
        let report = collector.collect(&app).await.unwrap();

        assert_eq!(report.deleted, vec![RevisionNumber::new(1), RevisionNumber::new(2)]);
        assert_eq!(store.count(&app), 2);
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_when_senders_drop() {
        let store = Arc::new(InMemoryRevisionStore::new());
        let events = Arc::new(RecordingEventSink::new());
        let (signal, rx) = GcSignal::channel(4);
        let collector = Arc::new(RevisionCollector::new(store, events, Retention::KeepAll));

        let handle = tokio::spawn(async move { collector.run(rx).await });
        signal.signal(&AppId::new("default", "web"));
        drop(signal);
        handle.await.unwrap();
    }
}
