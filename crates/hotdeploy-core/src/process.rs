//! Production [`Toolchain`]: shells out to `git`, `tar` and the supervisor
//! binary through `tokio::process`.

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::domain::error::ToolError;
use crate::toolchain::{
    check_repository_url, ExitSummary, SupervisorLaunch, SupervisorProcess, Toolchain,
};

/// Toolchain backed by the host's `git` and `tar` executables.
#[derive(Debug, Clone)]
pub struct SystemToolchain {
    git: String,
    tar: String,
}

impl Default for SystemToolchain {
    fn default() -> Self {
        Self {
            git: "git".to_string(),
            tar: "tar".to_string(),
        }
    }
}

impl SystemToolchain {
    pub fn new() -> Self {
        Self::default()
    }
}

fn describe(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a command to completion, capturing output. Non-zero exit is an error
/// carrying the command's stderr.
pub async fn run_command(program: &str, args: &[&str], dir: Option<&Path>) -> Result<(), ToolError> {
    let command = describe(program, args);
    let start = Instant::now();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }

    let output = cmd
        .output()
        .await
        .map_err(|source| ToolError::Spawn {
            command: command.clone(),
            source,
        })?;

    let duration_ms = start.elapsed().as_millis() as u64;
    if !output.status.success() {
        return Err(ToolError::NonZeroExit {
            command,
            exit_code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    debug!(
        command = %command,
        duration_ms,
        stdout = %String::from_utf8_lossy(&output.stdout).trim(),
        "command succeeded"
    );
    Ok(())
}

#[async_trait]
impl Toolchain for SystemToolchain {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), ToolError> {
        check_repository_url(url)?;
        let dest = dest.to_string_lossy();
        run_command(&self.git, &["clone", "--", url, &dest], None).await
    }

    async fn pull_repo(&self, url: &str, dir: &Path) -> Result<(), ToolError> {
        check_repository_url(url)?;
        run_command(&self.git, &["pull", "--", url], Some(dir)).await
    }

    async fn extract_archive(&self, archive: &Path, dest: &Path) -> Result<(), ToolError> {
        let archive = archive.to_string_lossy();
        let dest = dest.to_string_lossy();
        run_command(&self.tar, &["-xzf", &archive, "-C", &dest], None).await
    }

    async fn spawn_supervisor(
        &self,
        launch: &SupervisorLaunch,
    ) -> Result<Box<dyn SupervisorProcess>, ToolError> {
        let command = format!("{} {}", launch.program.display(), launch.args.join(" "));
        // A relative program path would otherwise be resolved against the
        // child's working directory.
        let program = tokio::fs::canonicalize(&launch.program)
            .await
            .map_err(|source| ToolError::Spawn {
                command: command.clone(),
                source,
            })?;

        let child = Command::new(&program)
            .args(&launch.args)
            .current_dir(&launch.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn { command, source })?;

        Ok(Box::new(ChildSupervisor { child }))
    }
}

/// A supervisor running as a real child process.
#[derive(Debug)]
pub struct ChildSupervisor {
    child: Child,
}

#[async_trait]
impl SupervisorProcess for ChildSupervisor {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit(&mut self) -> Result<Option<ExitSummary>, ToolError> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| ExitSummary { code: status.code() }))
    }

    async fn wait(&mut self) -> Result<ExitSummary, ToolError> {
        let status = self.child.wait().await?;
        Ok(ExitSummary {
            code: status.code(),
        })
    }

    async fn kill(&mut self) -> Result<(), ToolError> {
        // tokio refuses to kill a child that has already been reaped.
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill().await?;
        Ok(())
    }
}
