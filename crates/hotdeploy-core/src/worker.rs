//! Per-repository serialized execution context.
//!
//! A [`RepoWorker`] owns the receiving end of its bounded job queue and the
//! supervisor it launched. Its run loop waits on the shutdown signal, the exit
//! of the attached supervisor, and the next job, in that priority order, and
//! runs at most one pipeline at a time.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{info, warn, Instrument};

use crate::domain::job::DeployJob;
use crate::obs;
use crate::pipeline::{report_outcome, DeployPipeline};
use crate::shutdown::Shutdown;
use crate::supervision::Supervision;

/// Pending jobs a worker buffers before dispatch waits for room.
pub const QUEUE_CAPACITY: usize = 16;

/// Sending side of a worker's queue, held by the dispatcher.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    jobs: mpsc::Sender<DeployJob>,
}

impl WorkerHandle {
    /// Wait for a queue slot, then enqueue. Returns `false` without enqueueing
    /// if shutdown is signalled first or the worker has stopped.
    pub async fn enqueue(&self, job: DeployJob, shutdown: &Shutdown) -> bool {
        let permit = tokio::select! {
            biased;
            _ = shutdown.wait() => return false,
            permit = self.jobs.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };
        obs::emit_job_enqueued(&job);
        permit.send(job);
        true
    }
}

pub struct RepoWorker {
    name: String,
    jobs: mpsc::Receiver<DeployJob>,
    supervision: Supervision,
    pipeline: Arc<DeployPipeline>,
    shutdown: Shutdown,
}

impl RepoWorker {
    pub fn new(
        name: impl Into<String>,
        pipeline: Arc<DeployPipeline>,
        shutdown: Shutdown,
    ) -> (Self, WorkerHandle) {
        let name = name.into();
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let worker = Self {
            name,
            jobs: rx,
            supervision: Supervision::default(),
            pipeline,
            shutdown,
        };
        (worker, WorkerHandle { jobs: tx })
    }

    /// Run until shutdown, or until every handle has been dropped.
    pub async fn run(mut self) {
        info!(repository = %self.name, "worker started");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                exit = self.supervision.exited() => match exit {
                    Ok(exit) => obs::emit_supervisor_exited(&self.name, &exit),
                    Err(e) => warn!(repository = %self.name, error = %e, "lost track of supervisor"),
                },
                job = self.jobs.recv() => match job {
                    Some(job) => self.process(job).await,
                    None => break,
                },
            }
        }
        self.stop().await;
    }

    async fn process(&mut self, job: DeployJob) {
        let span = obs::job_span(&job);
        async {
            obs::emit_job_started(&job);
            let start = Instant::now();
            let result = self.pipeline.run(&job, &mut self.supervision).await;
            report_outcome(&result, start.elapsed().as_millis() as u64);
        }
        .instrument(span)
        .await
    }

    /// Kill the supervisor and discard whatever is still queued.
    async fn stop(&mut self) {
        self.jobs.close();
        let mut dropped = 0;
        while self.jobs.try_recv().is_ok() {
            dropped += 1;
        }

        let pid = self.supervision.pid();
        match self.supervision.terminate().await {
            Ok(true) => info!(repository = %self.name, pid = ?pid, "killed supervisor"),
            Ok(false) => {}
            Err(e) => warn!(repository = %self.name, error = %e, "failed to kill supervisor"),
        }
        obs::emit_worker_stopped(&self.name, dropped);
    }
}
