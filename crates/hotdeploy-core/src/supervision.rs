//! Supervisor state owned by a repository worker.
//!
//! `Idle -> Running(handle) -> Exited(status) -> Running(handle) ...`
//!
//! Only the owning worker's run loop touches this value, so it needs no lock.

use tracing::warn;

use crate::domain::error::ToolError;
use crate::toolchain::{ExitSummary, SupervisorProcess};

#[derive(Debug, Default)]
pub enum Supervision {
    /// Nothing launched yet.
    #[default]
    Idle,
    Running(Box<dyn SupervisorProcess>),
    /// The last launched process is gone; the next job relaunches.
    Exited(ExitSummary),
}

impl Supervision {
    pub fn is_running(&self) -> bool {
        matches!(self, Supervision::Running(_))
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            Supervision::Running(proc) => proc.id(),
            _ => None,
        }
    }

    /// Poll the attached process without blocking, moving to `Exited` if it
    /// has gone away. Returns the exit status observed by this call.
    pub fn refresh(&mut self) -> Option<ExitSummary> {
        let Supervision::Running(proc) = self else {
            return None;
        };
        match proc.try_exit() {
            Ok(Some(exit)) => {
                *self = Supervision::Exited(exit);
                Some(exit)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "cannot query supervisor status, detaching it");
                *self = Supervision::Idle;
                None
            }
        }
    }

    /// Resolve when the attached process exits; never resolves while nothing
    /// is running. Cancel-safe.
    pub async fn exited(&mut self) -> Result<ExitSummary, ToolError> {
        let result = match self {
            Supervision::Running(proc) => proc.wait().await,
            _ => std::future::pending().await,
        };
        *self = match &result {
            Ok(exit) => Supervision::Exited(*exit),
            Err(_) => Supervision::Idle,
        };
        result
    }

    /// Force-kill the attached process. Returns whether one was running.
    pub async fn terminate(&mut self) -> Result<bool, ToolError> {
        let Supervision::Running(proc) = self else {
            return Ok(false);
        };
        proc.kill().await?;
        let exit = proc.try_exit()?.unwrap_or_else(ExitSummary::signalled);
        *self = Supervision::Exited(exit);
        Ok(true)
    }
}
