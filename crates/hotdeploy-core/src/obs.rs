//! Structured observability hooks for the deploy lifecycle.
//!
//! Every event carries an `event` field (`job.started`, `supervisor.exited`,
//! ...) so log pipelines can filter on it without parsing messages.

use tracing::{info, warn};

use crate::domain::error::PipelineError;
use crate::domain::job::DeployJob;
use crate::toolchain::ExitSummary;

/// Span wrapping one pipeline execution.
pub fn job_span(job: &DeployJob) -> tracing::Span {
    tracing::info_span!(
        "deploy.job",
        repository = %job.repository_name(),
        job_id = %job.id,
    )
}

pub fn emit_job_enqueued(job: &DeployJob) {
    info!(
        event = "job.enqueued",
        repository = %job.repository_name(),
        job_id = %job.id,
        after = %job.event.short_after(),
        commits = job.event.total_commits_count,
    );
}

pub fn emit_job_started(job: &DeployJob) {
    let queued_ms = (chrono::Utc::now() - job.accepted_at).num_milliseconds();
    info!(event = "job.started", url = %job.repository_url(), queued_ms);
}

pub fn emit_job_finished(duration_ms: u64, launched: bool) {
    info!(event = "job.finished", duration_ms, launched);
}

/// Job-aborting failure: logged, then absorbed by the worker.
pub fn emit_job_failed(error: &PipelineError) {
    tracing::error!(
        event = "job.failed",
        repository = %error.repository,
        step = %error.step,
        error = %error.source,
        "deploy aborted"
    );
}

pub fn emit_supervisor_launched(repository: &str, pid: Option<u32>) {
    info!(event = "supervisor.launched", repository = %repository, pid = ?pid);
}

/// Abnormal exits are warnings; the supervisor is not restarted until the
/// next push.
pub fn emit_supervisor_exited(repository: &str, exit: &ExitSummary) {
    if exit.success() {
        info!(event = "supervisor.exited", repository = %repository, status = %exit);
    } else {
        warn!(event = "supervisor.exited", repository = %repository, status = %exit);
    }
}

pub fn emit_worker_stopped(repository: &str, dropped_jobs: usize) {
    info!(event = "worker.stopped", repository = %repository, dropped_jobs);
}
