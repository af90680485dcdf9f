//! Routes webhook events to per-repository workers.
//!
//! Workers are created lazily on the first event for a configured repository
//! and live until shutdown. The worker map is the only state shared between
//! request handlers; its lock covers the check-then-create sequence and is
//! released before enqueueing, so a full queue for one repository never
//! blocks dispatch to another.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::domain::event::WebhookEvent;
use crate::domain::job::DeployJob;
use crate::pipeline::DeployPipeline;
use crate::registry::RepositoryRegistry;
use crate::shutdown::Shutdown;
use crate::worker::{RepoWorker, WorkerHandle};

/// What happened to a dispatched event. The HTTP transport ignores it; tests
/// and logs use it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Enqueued,
    /// Not in the registry; dropped without side effects.
    UnknownRepository,
    /// Shutdown was signalled before the job could be queued.
    ShuttingDown,
}

#[derive(Default)]
struct WorkerRegistry {
    handles: HashMap<String, WorkerHandle>,
    tasks: JoinSet<()>,
}

pub struct Dispatcher {
    registry: RepositoryRegistry,
    pipeline: Arc<DeployPipeline>,
    shutdown: Shutdown,
    workers: Mutex<WorkerRegistry>,
}

impl Dispatcher {
    pub fn new(registry: RepositoryRegistry, pipeline: DeployPipeline, shutdown: Shutdown) -> Self {
        Self {
            registry,
            pipeline: Arc::new(pipeline),
            shutdown,
            workers: Mutex::new(WorkerRegistry::default()),
        }
    }

    pub fn shutdown_signal(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Route `event` to its repository's worker, waiting for queue room if
    /// necessary.
    pub async fn dispatch(&self, event: WebhookEvent) -> DispatchOutcome {
        if self.shutdown.is_triggered() {
            return DispatchOutcome::ShuttingDown;
        }

        let name = event.repository_name().to_string();
        let Some(repo) = self.registry.get(&name) else {
            debug!(repository = %name, "ignoring event for unconfigured repository");
            return DispatchOutcome::UnknownRepository;
        };

        let Some(handle) = self.worker_for(&name).await else {
            return DispatchOutcome::ShuttingDown;
        };

        if handle.enqueue(DeployJob::new(event, repo), &self.shutdown).await {
            DispatchOutcome::Enqueued
        } else {
            DispatchOutcome::ShuttingDown
        }
    }

    /// Look up or start the worker for `name`. `None` once shutting down.
    async fn worker_for(&self, name: &str) -> Option<WorkerHandle> {
        let mut workers = self.workers.lock().await;
        if self.shutdown.is_triggered() {
            return None;
        }
        if let Some(handle) = workers.handles.get(name) {
            return Some(handle.clone());
        }

        let (worker, handle) = RepoWorker::new(name, self.pipeline.clone(), self.shutdown.clone());
        workers.tasks.spawn(worker.run());
        workers.handles.insert(name.to_string(), handle.clone());
        info!(repository = %name, workers = workers.handles.len(), "created worker");
        Some(handle)
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.handles.len()
    }

    pub async fn has_worker(&self, name: &str) -> bool {
        self.workers.lock().await.handles.contains_key(name)
    }

    /// Signal shutdown and wait for every worker to kill its supervisor and
    /// exit.
    pub async fn shutdown(&self) {
        self.shutdown.trigger();
        let mut tasks = {
            let mut workers = self.workers.lock().await;
            std::mem::take(&mut workers.tasks)
        };

        let mut stopped = 0usize;
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(()) => stopped += 1,
                Err(e) => error!(error = %e, "worker task failed"),
            }
        }
        info!(workers = stopped, "all workers stopped");
    }
}
