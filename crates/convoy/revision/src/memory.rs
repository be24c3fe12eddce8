//! In-memory revision store for development and testing.

use crate::error::{Result, RevisionError};
use crate::fingerprint::{component_hash, fingerprint};
use crate::store::{RevisionDraft, RevisionStore, RevisionSummary, PIN_ROLLOUT};
use async_trait::async_trait;
use chrono::Utc;
use convoy_types::{AppId, ApplicationRevision, ComponentRevision, RevisionNumber};
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Everything stored for one application
#[derive(Debug, Default)]
struct AppHistory {
    /// Highest number ever allocated
    high_water: RevisionNumber,
    revisions: BTreeMap<RevisionNumber, ApplicationRevision>,
    pins: BTreeMap<String, RevisionNumber>,
    /// Last component revision issued per component name
    components: BTreeMap<String, ComponentRevision>,
}

impl AppHistory {
    fn holder_of(&self, number: RevisionNumber) -> Option<&str> {
        self.pins
            .iter()
            .find(|(_, n)| **n == number)
            .map(|(holder, _)| holder.as_str())
    }
}

/// In-memory implementation of [`RevisionStore`].
///
/// All mutations of one application happen under that application's map
/// entry, which makes number allocation a compare-and-swap.
pub struct InMemoryRevisionStore {
    histories: DashMap<AppId, AppHistory>,
}

impl InMemoryRevisionStore {
    pub fn new() -> Self {
        Self {
            histories: DashMap::new(),
        }
    }

    /// Number of revisions stored for `app`
    pub fn count(&self, app: &AppId) -> usize {
        self.histories
            .get(app)
            .map(|h| h.revisions.len())
            .unwrap_or(0)
    }

    /// Pins held on `app`, by holder
    pub fn pins(&self, app: &AppId) -> BTreeMap<String, RevisionNumber> {
        self.histories
            .get(app)
            .map(|h| h.pins.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryRevisionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn verify(revision: &ApplicationRevision) -> Result<()> {
    let actual = fingerprint(&revision.render);
    if actual != revision.fingerprint {
        return Err(RevisionError::Corrupted {
            app: revision.app.clone(),
            number: revision.number,
            reason: format!(
                "stored fingerprint {} does not match render {}",
                revision.fingerprint.short(),
                actual.short()
            ),
        });
    }
    Ok(())
}

#[async_trait]
impl RevisionStore for InMemoryRevisionStore {
    async fn get_latest(&self, app: &AppId) -> Result<Option<ApplicationRevision>> {
        let Some(history) = self.histories.get(app) else {
            return Ok(None);
        };
        match history.revisions.values().next_back() {
            Some(revision) => {
                verify(revision)?;
                Ok(Some(revision.clone()))
            }
            None => Ok(None),
        }
    }

    async fn get(
        &self,
        app: &AppId,
        number: RevisionNumber,
    ) -> Result<Option<ApplicationRevision>> {
        let Some(history) = self.histories.get(app) else {
            return Ok(None);
        };
        match history.revisions.get(&number) {
            Some(revision) => {
                verify(revision)?;
                Ok(Some(revision.clone()))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, app: &AppId) -> Result<Vec<RevisionSummary>> {
        Ok(self
            .histories
            .get(app)
            .map(|h| {
                h.revisions
                    .values()
                    .map(|r| RevisionSummary {
                        number: r.number,
                        fingerprint: r.fingerprint.clone(),
                        generation: r.generation,
                        created_at: r.created_at,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_number(&self, app: &AppId) -> Result<RevisionNumber> {
        Ok(self
            .histories
            .get(app)
            .map(|h| h.high_water)
            .unwrap_or(RevisionNumber::ZERO))
    }

    async fn create_next(
        &self,
        app: &AppId,
        observed: RevisionNumber,
        draft: RevisionDraft,
    ) -> Result<ApplicationRevision> {
        let fingerprint = fingerprint(&draft.render);
        let mut history = self.histories.entry(app.clone()).or_default();

        if history.high_water != observed {
            return Err(RevisionError::Conflict {
                app: app.clone(),
                expected: observed,
                actual: history.high_water,
            });
        }
        let number = observed.next();

        let mut component_revisions = BTreeMap::new();
        for component in &draft.render.components {
            let hash = component_hash(component);
            let revision = match history.components.get(&component.name) {
                Some(previous) if previous.hash == hash => previous.clone(),
                Some(previous) => ComponentRevision {
                    component: component.name.clone(),
                    number: previous.number + 1,
                    hash,
                },
                None => ComponentRevision {
                    component: component.name.clone(),
                    number: 1,
                    hash,
                },
            };
            component_revisions.insert(component.name.clone(), revision);
        }
        for (name, revision) in &component_revisions {
            history.components.insert(name.clone(), revision.clone());
        }

        let revision = ApplicationRevision {
            app: app.clone(),
            number,
            fingerprint,
            generation: draft.generation,
            render: draft.render,
            component_revisions,
            created_at: Utc::now(),
        };

        history.high_water = number;
        history.revisions.insert(number, revision.clone());
        history.pins.insert(PIN_ROLLOUT.to_string(), number);

        debug!(
            app = %app,
            revision = %number,
            fingerprint = %revision.fingerprint.short(),
            "Revision created"
        );
        Ok(revision)
    }

    async fn delete(&self, app: &AppId, number: RevisionNumber) -> Result<bool> {
        let Some(mut history) = self.histories.get_mut(app) else {
            return Ok(false);
        };
        if let Some(holder) = history.holder_of(number) {
            return Err(RevisionError::Referenced {
                app: app.clone(),
                number,
                holder: holder.to_string(),
            });
        }
        Ok(history.revisions.remove(&number).is_some())
    }

    async fn delete_all(&self, app: &AppId) -> Result<usize> {
        let Some(mut history) = self.histories.get_mut(app) else {
            return Ok(0);
        };
        let count = history.revisions.len();
        history.revisions.clear();
        history.pins.clear();
        Ok(count)
    }

    async fn pin(&self, app: &AppId, holder: &str, number: RevisionNumber) -> Result<()> {
        self.histories
            .entry(app.clone())
            .or_default()
            .pins
            .insert(holder.to_string(), number);
        Ok(())
    }

    async fn unpin(&self, app: &AppId, holder: &str) -> Result<()> {
        if let Some(mut history) = self.histories.get_mut(app) {
            history.pins.remove(holder);
        }
        Ok(())
    }

    async fn list_referenced(&self, app: &AppId) -> Result<BTreeSet<RevisionNumber>> {
        Ok(self
            .histories
            .get(app)
            .map(|h| h.pins.values().copied().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{cluster_pin, PIN_STATUS};
    use convoy_types::{Manifest, RenderOutput, RenderedComponent};
    use serde_json::json;
    use std::sync::Arc;

    fn app() -> AppId {
        AppId::new("default", "web")
    }

    fn draft(images: &[(&str, &str)]) -> RevisionDraft {
        RevisionDraft {
            generation: 1,
            render: RenderOutput {
                components: images
                    .iter()
                    .map(|(name, image)| RenderedComponent {
                        name: name.to_string(),
                        type_name: "webservice".into(),
                        workload: Manifest::new("apps/v1", "Deployment", *name)
                            .with_spec(json!({"image": image})),
                        auxiliaries: vec![],
                        traits: vec![],
                    })
                    .collect(),
                policies: vec![],
                workflow: vec![],
            },
        }
    }

    #[tokio::test]
    async fn test_create_and_get_latest() {
        let store = InMemoryRevisionStore::new();
        assert!(store.get_latest(&app()).await.unwrap().is_none());
        assert_eq!(store.latest_number(&app()).await.unwrap(), RevisionNumber::ZERO);

        let rev = store
            .create_next(&app(), RevisionNumber::ZERO, draft(&[("frontend", "nginx")]))
            .await
            .unwrap();
        assert_eq!(rev.number, RevisionNumber::new(1));
        assert_eq!(rev.name(), "web-v1");

        let latest = store.get_latest(&app()).await.unwrap().unwrap();
        assert_eq!(latest, rev);
        assert_eq!(store.pins(&app())[PIN_ROLLOUT], RevisionNumber::new(1));
    }

    #[tokio::test]
    async fn test_conflict_on_stale_observed_number() {
        let store = InMemoryRevisionStore::new();
        store
            .create_next(&app(), RevisionNumber::ZERO, draft(&[("frontend", "a")]))
            .await
            .unwrap();

        let err = store
            .create_next(&app(), RevisionNumber::ZERO, draft(&[("frontend", "b")]))
            .await
            .unwrap_err();
        assert!(matches!(err, RevisionError::Conflict { actual, .. } if actual == RevisionNumber::new(1)));
        assert!(err.is_transient());
        assert_eq!(store.count(&app()), 1);
    }

    #[tokio::test]
    async fn test_numbers_never_reused_after_delete() {
        let store = InMemoryRevisionStore::new();
        for (i, image) in ["a", "b", "c"].iter().enumerate() {
            store
                .create_next(&app(), RevisionNumber::new(i as u64), draft(&[("frontend", image)]))
                .await
                .unwrap();
        }
        store.unpin(&app(), PIN_ROLLOUT).await.unwrap();
        assert!(store.delete(&app(), RevisionNumber::new(3)).await.unwrap());

        assert_eq!(store.latest_number(&app()).await.unwrap(), RevisionNumber::new(3));
        let next = store
            .create_next(&app(), RevisionNumber::new(3), draft(&[("frontend", "d")]))
            .await
            .unwrap();
        assert_eq!(next.number, RevisionNumber::new(4));

        assert_eq!(store.delete_all(&app()).await.unwrap(), 3);
        assert_eq!(store.latest_number(&app()).await.unwrap(), RevisionNumber::new(4));
    }

    #[tokio::test]
    async fn test_pinned_revision_cannot_be_deleted() {
        let store = InMemoryRevisionStore::new();
        store
            .create_next(&app(), RevisionNumber::ZERO, draft(&[("frontend", "a")]))
            .await
            .unwrap();
        store.pin(&app(), PIN_STATUS, RevisionNumber::new(1)).await.unwrap();
        store.unpin(&app(), PIN_ROLLOUT).await.unwrap();

        let err = store.delete(&app(), RevisionNumber::new(1)).await.unwrap_err();
        assert!(matches!(err, RevisionError::Referenced { ref holder, .. } if holder == PIN_STATUS));

        store.unpin(&app(), PIN_STATUS).await.unwrap();
        assert!(store.delete(&app(), RevisionNumber::new(1)).await.unwrap());
        assert!(!store.delete(&app(), RevisionNumber::new(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_referenced() {
        let store = InMemoryRevisionStore::new();
        store.pin(&app(), PIN_STATUS, RevisionNumber::new(2)).await.unwrap();
        store.pin(&app(), &cluster_pin("prod"), RevisionNumber::new(1)).await.unwrap();
        store.pin(&app(), &cluster_pin("edge"), RevisionNumber::new(2)).await.unwrap();

        let referenced = store.list_referenced(&app()).await.unwrap();
        assert_eq!(
            referenced.into_iter().collect::<Vec<_>>(),
            vec![RevisionNumber::new(1), RevisionNumber::new(2)]
        );
    }

    #[tokio::test]
    async fn test_component_revisions_only_advance_on_change() {
        let store = InMemoryRevisionStore::new();
        let r1 = store
            .create_next(&app(), RevisionNumber::ZERO, draft(&[("frontend", "a")]))
            .await
            .unwrap();
        let r2 = store
            .create_next(
                &app(),
                RevisionNumber::new(1),
                draft(&[("frontend", "a"), ("backend", "x")]),
            )
            .await
            .unwrap();
        let r3 = store
            .create_next(
                &app(),
                RevisionNumber::new(2),
                draft(&[("frontend", "b"), ("backend", "x")]),
            )
            .await
            .unwrap();

        assert_eq!(r1.component_revision("frontend").unwrap().name(), "frontend-v1");
        assert_eq!(r2.component_revision("frontend").unwrap().name(), "frontend-v1");
        assert_eq!(r2.component_revision("backend").unwrap().name(), "backend-v1");
        assert_eq!(r3.component_revision("frontend").unwrap().name(), "frontend-v2");
        assert_eq!(r3.component_revision("backend").unwrap().name(), "backend-v1");
    }

    #[tokio::test]
    async fn test_corrupted_revision_is_reported() {
        let store = InMemoryRevisionStore::new();
        store
            .create_next(&app(), RevisionNumber::ZERO, draft(&[("frontend", "a")]))
            .await
            .unwrap();
        if let Some(mut history) = store.histories.get_mut(&app()) {
            if let Some(rev) = history.revisions.get_mut(&RevisionNumber::new(1)) {
                rev.render.components.clear();
            }
        }

        let err = store.get_latest(&app()).await.unwrap_err();
        assert!(matches!(err, RevisionError::Corrupted { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_concurrent_creators_allocate_distinct_numbers() {
        let store = Arc::new(InMemoryRevisionStore::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let image = format!("img-{}", i);
                loop {
                    let observed = store.latest_number(&app()).await.unwrap();
                    match store
                        .create_next(&app(), observed, draft(&[("frontend", image.as_str())]))
                        .await
                    {
                        Ok(rev) => return rev.number,
                        Err(RevisionError::Conflict { .. }) => continue,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            }));
        }

        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap().get());
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=8).collect::<Vec<u64>>());
    }
}
