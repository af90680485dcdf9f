//! Port traits for the external commands a deploy depends on.
//!
//! The pipeline only talks to [`Toolchain`] and [`SupervisorProcess`]; the
//! production implementation lives in [`crate::process`], in-memory fakes in
//! [`crate::fakes`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::error::ToolError;

/// Reject URLs git would read as a command-line option (`--upload-pack=..`).
/// The URL comes from an unauthenticated request body.
pub fn check_repository_url(url: &str) -> Result<(), ToolError> {
    if url.trim_start().starts_with('-') {
        return Err(ToolError::OptionLikeUrl(url.to_string()));
    }
    Ok(())
}

/// How a supervisor process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitSummary {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ExitSummary {
    pub fn from_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn signalled() -> Self {
        Self { code: None }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for ExitSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// Everything needed to start the supervisor for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorLaunch {
    pub repository: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

/// A launched supervisor owned by exactly one repository worker.
#[async_trait]
pub trait SupervisorProcess: Send + std::fmt::Debug {
    /// OS process id, if the process is still known to the OS.
    fn id(&self) -> Option<u32>;

    /// Non-blocking exit check. `Ok(None)` while still running.
    fn try_exit(&mut self) -> Result<Option<ExitSummary>, ToolError>;

    /// Wait for the process to exit. Cancel-safe: dropping the future leaves
    /// the process untouched.
    async fn wait(&mut self) -> Result<ExitSummary, ToolError>;

    /// Force-kill the process and reap it.
    async fn kill(&mut self) -> Result<(), ToolError>;
}

/// git, tar and process-spawn primitives.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// `git clone <url> <dest>`.
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), ToolError>;

    /// `git pull <url>` inside `dir`.
    async fn pull_repo(&self, url: &str, dir: &Path) -> Result<(), ToolError>;

    /// Extract the gzip tarball at `archive` into `dest`.
    async fn extract_archive(&self, archive: &Path, dest: &Path) -> Result<(), ToolError>;

    /// Start the supervisor with inherited stdout/stderr.
    async fn spawn_supervisor(
        &self,
        launch: &SupervisorLaunch,
    ) -> Result<Box<dyn SupervisorProcess>, ToolError>;
}
