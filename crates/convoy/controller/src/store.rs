//! Application store
//!
//! The controller reads Applications and writes only their status and
//! finalizer. Status writes are compare-and-swap on `resource_version`.

use crate::error::StoreError;
use async_trait::async_trait;
use convoy_types::{AppId, Application, ApplicationSpec, ApplicationStatus};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Source of Applications
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn get(&self, id: &AppId) -> Result<Option<Application>, StoreError>;

    /// All application ids, for periodic resync
    async fn list(&self) -> Result<Vec<AppId>, StoreError>;

    /// Replace the status if the stored resource version still equals
    /// `expected_resource_version`
    async fn update_status(
        &self,
        id: &AppId,
        expected_resource_version: u64,
        status: ApplicationStatus,
    ) -> Result<Application, StoreError>;

    /// Drop the engine's finalizer. An application whose deletion was
    /// requested disappears once the finalizer is released.
    async fn release_finalizer(&self, id: &AppId) -> Result<(), StoreError>;
}

/// In-memory implementation for development and testing
pub struct InMemoryApplicationStore {
    apps: DashMap<AppId, Application>,
    unavailable: AtomicBool,
    status_writes: AtomicU64,
}

impl InMemoryApplicationStore {
    pub fn new() -> Self {
        Self {
            apps: DashMap::new(),
            unavailable: AtomicBool::new(false),
            status_writes: AtomicU64::new(0),
        }
    }

    /// Create the application or edit its spec. The generation only moves
    /// when the spec actually changes.
    pub fn apply(&self, id: AppId, spec: ApplicationSpec) -> Application {
        let mut entry = self
            .apps
            .entry(id.clone())
            .or_insert_with(|| Application::new(id, spec.clone()));
        if entry.spec != spec {
            entry.spec = spec;
            entry.generation += 1;
            entry.resource_version += 1;
        }
        entry.clone()
    }

    /// Mark the application for deletion. Returns false if it does not exist.
    pub fn request_deletion(&self, id: &AppId) -> bool {
        match self.apps.get_mut(id) {
            Some(mut app) => {
                if !app.deletion_requested {
                    app.deletion_requested = true;
                    app.resource_version += 1;
                }
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &AppId) -> bool {
        self.apps.contains_key(id)
    }

    /// Make every call fail, as if the API server were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Successful status writes so far
    pub fn status_writes(&self) -> u64 {
        self.status_writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryApplicationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApplicationStore for InMemoryApplicationStore {
    async fn get(&self, id: &AppId) -> Result<Option<Application>, StoreError> {
        self.check_available()?;
        Ok(self.apps.get(id).map(|a| a.clone()))
    }

    async fn list(&self) -> Result<Vec<AppId>, StoreError> {
        self.check_available()?;
        let mut ids: Vec<AppId> = self.apps.iter().map(|a| a.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }

    async fn update_status(
        &self,
        id: &AppId,
        expected_resource_version: u64,
        status: ApplicationStatus,
    ) -> Result<Application, StoreError> {
        self.check_available()?;
        let mut app = self
            .apps
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if app.resource_version != expected_resource_version {
            return Err(StoreError::Conflict {
                app: id.clone(),
                expected: expected_resource_version,
                actual: app.resource_version,
            });
        }
        app.status = status;
        app.resource_version += 1;
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(app.clone())
    }

    async fn release_finalizer(&self, id: &AppId) -> Result<(), StoreError> {
        self.check_available()?;
        self.apps.remove_if(id, |_, app| app.deletion_requested);
        Ok(())
    }
}
