//! The deploy pipeline: sync, provision, supervise.
//!
//! Each step is fallible; the first failure aborts the job with a
//! [`PipelineError`] naming the step. Nothing is rolled back.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::assets::{BundledAssets, SUPERVISOR_BINARY};
use crate::domain::error::{PipelineError, PipelineStep, ToolError};
use crate::domain::job::DeployJob;
use crate::obs;
use crate::supervision::Supervision;
use crate::toolchain::{check_repository_url, SupervisorLaunch, Toolchain};

/// How the working copy was brought up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    Cloned,
    Pulled,
}

/// What the supervise step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuperviseAction {
    Launched { pid: Option<u32> },
    /// A running supervisor was killed and a new one started
    /// (`restart_on_push`).
    Restarted { pid: Option<u32> },
    /// A supervisor is attached and still running; left alone.
    AlreadyRunning,
}

impl SuperviseAction {
    pub fn launched(&self) -> bool {
        !matches!(self, SuperviseAction::AlreadyRunning)
    }
}

/// Outcome of a successful pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub sync: SyncKind,
    /// Whether the supervisor binary had to be extracted.
    pub provisioned: bool,
    pub supervise: SuperviseAction,
}

/// Shared by every worker; holds no per-repository state.
pub struct DeployPipeline {
    toolchain: Arc<dyn Toolchain>,
    assets: Arc<BundledAssets>,
    work_root: PathBuf,
}

impl std::fmt::Debug for DeployPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployPipeline")
            .field("work_root", &self.work_root)
            .field("asset_digest", &self.assets.short_digest())
            .finish_non_exhaustive()
    }
}

impl DeployPipeline {
    pub fn new(
        toolchain: Arc<dyn Toolchain>,
        assets: Arc<BundledAssets>,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            toolchain,
            assets,
            work_root: work_root.into(),
        }
    }

    /// Working copy for a repository: `<work_root>/<name>`.
    pub fn repo_dir(&self, repository: &str) -> PathBuf {
        self.work_root.join(repository)
    }

    /// Run all three steps for `job`, attaching a newly launched supervisor
    /// to `supervision`.
    pub async fn run(
        &self,
        job: &DeployJob,
        supervision: &mut Supervision,
    ) -> Result<PipelineReport, PipelineError> {
        let dir = self.repo_dir(job.repository_name());
        let sync = self.sync(job, &dir).await?;
        let provisioned = self.provision(job, &dir).await?;
        let supervise = self.supervise(job, &dir, supervision).await?;
        Ok(PipelineReport {
            sync,
            provisioned,
            supervise,
        })
    }

    async fn sync(&self, job: &DeployJob, dir: &Path) -> Result<SyncKind, PipelineError> {
        let url = job.repository_url();
        let exists = tokio::fs::try_exists(dir).await.unwrap_or(false);
        let step = if exists {
            PipelineStep::Pull
        } else {
            PipelineStep::Clone
        };
        let fail = |e: ToolError| PipelineError::new(job.repository_name(), step, e);
        check_repository_url(url).map_err(fail)?;

        if exists {
            debug!(dir = %dir.display(), "pulling");
            self.toolchain.pull_repo(url, dir).await.map_err(fail)?;
            Ok(SyncKind::Pulled)
        } else {
            info!(dir = %dir.display(), url = %url, "cloning");
            self.toolchain.clone_repo(url, dir).await.map_err(fail)?;
            Ok(SyncKind::Cloned)
        }
    }

    /// Extract the bundled archive unless the binary is already present.
    async fn provision(&self, job: &DeployJob, dir: &Path) -> Result<bool, PipelineError> {
        let binary = dir.join(SUPERVISOR_BINARY);
        if tokio::fs::try_exists(&binary).await.unwrap_or(false) {
            return Ok(false);
        }

        let fail = |e: ToolError| PipelineError::new(job.repository_name(), PipelineStep::Provision, e);
        let assets = self.assets.clone();
        let archive = tokio::task::spawn_blocking(move || assets.materialize())
            .await
            .map_err(std::io::Error::other)
            .and_then(|res| res)
            .map_err(|e| fail(e.into()))?;
        self.toolchain
            .extract_archive(archive.path(), dir)
            .await
            .map_err(fail)?;

        if !tokio::fs::try_exists(&binary).await.unwrap_or(false) {
            return Err(fail(ToolError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("archive did not contain {SUPERVISOR_BINARY}"),
            ))));
        }
        info!(binary = %binary.display(), "provisioned supervisor");
        Ok(true)
    }

    async fn supervise(
        &self,
        job: &DeployJob,
        dir: &Path,
        supervision: &mut Supervision,
    ) -> Result<SuperviseAction, PipelineError> {
        let name = job.repository_name();
        if let Some(exit) = supervision.refresh() {
            obs::emit_supervisor_exited(name, &exit);
        }

        let restarting = supervision.is_running();
        if restarting {
            if !job.repo.restart_on_push {
                debug!(pid = ?supervision.pid(), "supervisor still running, not relaunching");
                return Ok(SuperviseAction::AlreadyRunning);
            }
            info!(pid = ?supervision.pid(), "restarting supervisor");
            supervision
                .terminate()
                .await
                .map_err(|e| PipelineError::new(name, PipelineStep::Launch, e))?;
        }

        let launch = SupervisorLaunch {
            repository: name.to_string(),
            program: dir.join(SUPERVISOR_BINARY),
            args: job.repo.supervisor_args(),
            working_dir: dir.to_path_buf(),
        };
        let proc = self
            .toolchain
            .spawn_supervisor(&launch)
            .await
            .map_err(|e| PipelineError::new(name, PipelineStep::Launch, e))?;

        let pid = proc.id();
        *supervision = Supervision::Running(proc);
        obs::emit_supervisor_launched(name, pid);

        if restarting {
            Ok(SuperviseAction::Restarted { pid })
        } else {
            Ok(SuperviseAction::Launched { pid })
        }
    }
}

/// Log a finished job. Failures are absorbed here.
pub(crate) fn report_outcome(result: &Result<PipelineReport, PipelineError>, duration_ms: u64) {
    match result {
        Ok(report) => {
            debug!(?report, "pipeline report");
            obs::emit_job_finished(duration_ms, report.supervise.launched());
        }
        Err(e) => {
            obs::emit_job_failed(e);
            if e.step == PipelineStep::Launch {
                warn!("supervisor not running; the next push will retry the launch");
            }
        }
    }
}
