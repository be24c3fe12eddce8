//! Reconciliation controller
//!
//! Owns the work queue and a fixed pool of workers. The queue guarantees that
//! a given application is reconciled by at most one worker at a time while
//! different applications proceed in parallel.

use crate::backoff::Backoff;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::gc::RevisionCollector;
use crate::queue::WorkQueue;
use crate::reconciler::{ReconcileOutcome, Reconciler, Requeue};
use crate::store::ApplicationStore;
use convoy_revision::GcReport;
use convoy_types::AppId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

/// Running reconciliation controller
pub struct Controller {
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue<AppId>>,
    collector: Arc<RevisionCollector>,
    apps: Arc<dyn ApplicationStore>,
    config: ControllerConfig,
    backoff: Backoff,
    gc_rx: Mutex<Option<mpsc::Receiver<AppId>>>,
    workers: Mutex<JoinSet<()>>,
    gc_task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Controller {
    pub(crate) fn new(
        reconciler: Reconciler,
        collector: RevisionCollector,
        gc_rx: mpsc::Receiver<AppId>,
    ) -> Self {
        let config = reconciler.config.clone();
        let apps = reconciler.apps.clone();
        Self {
            backoff: config.backoff(),
            reconciler: Arc::new(reconciler),
            queue: Arc::new(WorkQueue::new()),
            collector: Arc::new(collector),
            apps,
            config,
            gc_rx: Mutex::new(Some(gc_rx)),
            workers: Mutex::new(JoinSet::new()),
            gc_task: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Start the workers and the revision collector
    pub async fn start(&self) -> Result<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ControllerError::InvalidRequest(
                "controller already started".into(),
            ));
        }

        let mut workers = self.workers.lock().await;
        for index in 0..self.config.workers {
            workers.spawn(worker(
                index,
                self.reconciler.clone(),
                self.queue.clone(),
                self.backoff,
            ));
        }

        if let Some(rx) = self.gc_rx.lock().await.take() {
            let collector = self.collector.clone();
            *self.gc_task.lock().await = Some(tokio::spawn(async move {
                collector.run(rx).await;
            }));
        }

        info!(workers = self.config.workers, "Controller started");
        Ok(())
    }

    /// Stop handing out work and wait for in-flight reconciles to finish
    pub async fn shutdown(&self) {
        self.queue.shut_down();
        let mut workers = self.workers.lock().await;
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Worker ended abnormally");
            }
        }
        if let Some(task) = self.gc_task.lock().await.take() {
            task.abort();
        }
        info!("Controller stopped");
    }

    /// Queue `id` for reconciliation. Repeated calls before a worker picks
    /// the key up collapse into one reconcile.
    pub fn enqueue(&self, id: AppId) {
        self.queue.add(id);
    }

    /// Queue every known application
    pub async fn resync_all(&self) -> Result<usize> {
        let ids = self.apps.list().await?;
        let count = ids.len();
        for id in ids {
            self.queue.add(id);
        }
        debug!(count, "Resync queued");
        Ok(count)
    }

    /// Reconcile `id` on the calling task. Only allowed before `start`, since
    /// running workers could pick up the same key concurrently.
    pub async fn reconcile_now(&self, id: &AppId) -> Result<ReconcileOutcome> {
        if self.started.load(Ordering::SeqCst) {
            return Err(ControllerError::InvalidRequest(
                "reconcile_now is unavailable while workers run".into(),
            ));
        }
        let failures = self.queue.failures(id);
        let outcome = self.reconciler.reconcile(id, failures).await?;
        match outcome.requeue {
            Requeue::Backoff => {
                self.queue.requeue(id.clone(), &self.backoff);
            }
            Requeue::Never | Requeue::After(_) => self.queue.forget(id),
        }
        Ok(outcome)
    }

    /// Run one revision GC pass for `id` right away
    pub async fn collect_garbage(&self, id: &AppId) -> convoy_revision::Result<GcReport> {
        self.collector.collect(id).await
    }

    /// Consecutive failed reconciles of `id`
    pub fn failures(&self, id: &AppId) -> u32 {
        self.queue.failures(id)
    }

    /// Wait until nothing is queued or running. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let poll = async {
            loop {
                if self.queue.is_idle() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }
}

#[instrument(skip(reconciler, queue, backoff))]
async fn worker(
    index: usize,
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue<AppId>>,
    backoff: Backoff,
) {
    while let Some(id) = queue.get().await {
        let failures = queue.failures(&id);
        // a panicking reconcile abandons only its own key
        let task = {
            let reconciler = reconciler.clone();
            let id = id.clone();
            tokio::spawn(async move { reconciler.reconcile(&id, failures).await })
        };

        match task.await {
            Ok(Ok(outcome)) => match outcome.requeue {
                Requeue::Never => queue.forget(&id),
                Requeue::After(delay) => {
                    queue.forget(&id);
                    queue.add_after(id.clone(), delay);
                }
                Requeue::Backoff => {
                    let (failures, delay) = queue.requeue(id.clone(), &backoff);
                    debug!(app = %id, failures, delay_ms = delay.as_millis() as u64, "Retry scheduled");
                }
            },
            Ok(Err(e)) => {
                queue.forget(&id);
                error!(app = %id, error = %e, "Reconcile abandoned until next change");
            }
            Err(e) => {
                queue.forget(&id);
                error!(app = %id, error = %e, "Reconcile panicked");
            }
        }
        queue.done(&id);
    }
    debug!("Worker stopped");
}
