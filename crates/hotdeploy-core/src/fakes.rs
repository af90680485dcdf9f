//! In-memory fakes for the toolchain ports (testing only)
//!
//! `FakeToolchain` records every call instead of running git or tar, and
//! hands out `FakeSupervisor`s whose exit is driven by the test through a
//! `FakeSupervisorHandle`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify, Semaphore};

use crate::assets::SUPERVISOR_BINARY;
use crate::domain::error::ToolError;
use crate::toolchain::{ExitSummary, SupervisorLaunch, SupervisorProcess, Toolchain};

/// Upper bound for the `wait_for_*` helpers.
const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// One recorded toolchain invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    Clone {
        url: String,
        dest: PathBuf,
    },
    Pull {
        url: String,
        dir: PathBuf,
    },
    Extract {
        dest: PathBuf,
    },
    Launch {
        program: PathBuf,
        args: Vec<String>,
        working_dir: PathBuf,
    },
}

impl ToolCall {
    fn is_sync(&self) -> bool {
        matches!(self, ToolCall::Clone { .. } | ToolCall::Pull { .. })
    }
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<ToolCall>,
    fail_sync: bool,
    fail_extract: bool,
    fail_launch: bool,
    /// Directories with a sync in flight.
    syncing: HashSet<PathBuf>,
    overlapping_syncs: usize,
    supervisors: Vec<FakeSupervisorHandle>,
    next_pid: u32,
}

// ---------------------------------------------------------------------------
// FakeToolchain
// ---------------------------------------------------------------------------

/// Records calls, creates the directories and binary a real run would leave
/// behind, and optionally holds every sync until released.
#[derive(Debug, Default)]
pub struct FakeToolchain {
    state: Mutex<State>,
    gate: Option<Semaphore>,
    changed: Notify,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sync blocks until a permit is handed out by `release_syncs`.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn release_syncs(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn fail_sync(&self, fail: bool) {
        self.state.lock().unwrap().fail_sync = fail;
    }

    pub fn fail_extract(&self, fail: bool) {
        self.state.lock().unwrap().fail_extract = fail;
    }

    pub fn fail_launch(&self, fail: bool) {
        self.state.lock().unwrap().fail_launch = fail;
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// URLs of every clone or pull, in the order they started.
    pub fn synced_urls(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter_map(|call| match call {
                ToolCall::Clone { url, .. } | ToolCall::Pull { url, .. } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn extract_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .calls
            .iter()
            .filter(|c| matches!(c, ToolCall::Extract { .. }))
            .count()
    }

    pub fn launch_count(&self) -> usize {
        self.state.lock().unwrap().supervisors.len()
    }

    /// Number of times a sync started while another sync of the same
    /// directory was still in flight.
    pub fn overlapping_syncs(&self) -> usize {
        self.state.lock().unwrap().overlapping_syncs
    }

    pub fn supervisors(&self) -> Vec<FakeSupervisorHandle> {
        self.state.lock().unwrap().supervisors.clone()
    }

    /// Wait until at least `n` syncs have started.
    pub async fn wait_for_syncs(&self, n: usize) {
        self.wait_until("syncs", |s| s.calls.iter().filter(|c| c.is_sync()).count() >= n)
            .await
    }

    /// Wait until at least `n` supervisors have been launched.
    pub async fn wait_for_launches(&self, n: usize) {
        self.wait_until("launches", |s| s.supervisors.len() >= n)
            .await
    }

    async fn wait_until(&self, what: &str, ready: impl Fn(&State) -> bool) {
        let wait = async {
            loop {
                // Register before checking so a notification in between is
                // not lost.
                let notified = self.changed.notified();
                if ready(&self.state.lock().unwrap()) {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(WAIT_LIMIT, wait).await.is_err() {
            panic!("timed out waiting for {what}: {:?}", self.calls());
        }
    }

    async fn sync(&self, call: ToolCall, dir: &Path) -> Result<(), ToolError> {
        let command = match &call {
            ToolCall::Clone { .. } => "git clone",
            _ => "git pull",
        };
        let create_dir = matches!(call, ToolCall::Clone { .. });
        let fail = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call);
            if !state.syncing.insert(dir.to_path_buf()) {
                state.overlapping_syncs += 1;
            }
            state.fail_sync
        };
        self.changed.notify_waiters();

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        tokio::task::yield_now().await;

        self.state.lock().unwrap().syncing.remove(dir);
        if fail {
            return Err(ToolError::NonZeroExit {
                command: command.to_string(),
                exit_code: 128,
                stderr: "fatal: repository not found".to_string(),
            });
        }
        if create_dir {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Toolchain for FakeToolchain {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), ToolError> {
        let call = ToolCall::Clone {
            url: url.to_string(),
            dest: dest.to_path_buf(),
        };
        self.sync(call, dest).await
    }

    async fn pull_repo(&self, url: &str, dir: &Path) -> Result<(), ToolError> {
        let call = ToolCall::Pull {
            url: url.to_string(),
            dir: dir.to_path_buf(),
        };
        self.sync(call, dir).await
    }

    async fn extract_archive(&self, _archive: &Path, dest: &Path) -> Result<(), ToolError> {
        let fail = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(ToolCall::Extract {
                dest: dest.to_path_buf(),
            });
            state.fail_extract
        };
        self.changed.notify_waiters();

        if fail {
            return Err(ToolError::NonZeroExit {
                command: "tar".to_string(),
                exit_code: 2,
                stderr: "gzip: stdin: not in gzip format".to_string(),
            });
        }
        tokio::fs::create_dir_all(dest).await?;
        tokio::fs::write(dest.join(SUPERVISOR_BINARY), b"#!/bin/sh\n").await?;
        Ok(())
    }

    async fn spawn_supervisor(
        &self,
        launch: &SupervisorLaunch,
    ) -> Result<Box<dyn SupervisorProcess>, ToolError> {
        let supervisor = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(ToolCall::Launch {
                program: launch.program.clone(),
                args: launch.args.clone(),
                working_dir: launch.working_dir.clone(),
            });
            if state.fail_launch {
                None
            } else {
                state.next_pid += 1;
                let (supervisor, handle) = FakeSupervisor::new(1000 + state.next_pid);
                state.supervisors.push(handle);
                Some(supervisor)
            }
        };
        self.changed.notify_waiters();

        match supervisor {
            Some(supervisor) => Ok(Box::new(supervisor)),
            None => Err(ToolError::Spawn {
                command: launch.program.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeSupervisor
// ---------------------------------------------------------------------------

/// A supervisor that runs until its handle says otherwise.
#[derive(Debug)]
pub struct FakeSupervisor {
    pid: u32,
    status: watch::Receiver<Option<ExitSummary>>,
    handle: FakeSupervisorHandle,
}

/// Test-side control over a [`FakeSupervisor`].
#[derive(Debug, Clone)]
pub struct FakeSupervisorHandle {
    status: Arc<watch::Sender<Option<ExitSummary>>>,
    killed: Arc<AtomicBool>,
}

impl FakeSupervisor {
    pub fn new(pid: u32) -> (Self, FakeSupervisorHandle) {
        let (tx, rx) = watch::channel(None);
        let handle = FakeSupervisorHandle {
            status: Arc::new(tx),
            killed: Arc::new(AtomicBool::new(false)),
        };
        let supervisor = Self {
            pid,
            status: rx,
            handle: handle.clone(),
        };
        (supervisor, handle)
    }
}

#[async_trait]
impl SupervisorProcess for FakeSupervisor {
    fn id(&self) -> Option<u32> {
        if self.status.borrow().is_some() {
            None
        } else {
            Some(self.pid)
        }
    }

    fn try_exit(&mut self) -> Result<Option<ExitSummary>, ToolError> {
        Ok(*self.status.borrow())
    }

    async fn wait(&mut self) -> Result<ExitSummary, ToolError> {
        let exit = match self.status.wait_for(Option::is_some).await {
            Ok(status) => (*status).unwrap_or_else(ExitSummary::signalled),
            Err(_) => ExitSummary::signalled(),
        };
        Ok(exit)
    }

    async fn kill(&mut self) -> Result<(), ToolError> {
        self.handle.killed.store(true, Ordering::SeqCst);
        self.handle.status.send_if_modified(|status| {
            if status.is_some() {
                return false;
            }
            *status = Some(ExitSummary::signalled());
            true
        });
        Ok(())
    }
}

impl FakeSupervisorHandle {
    /// Make the supervisor exit on its own with `code`.
    pub fn exit(&self, code: i32) {
        self.status.send_replace(Some(ExitSummary::from_code(code)));
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn has_exited(&self) -> bool {
        self.status.borrow().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_supervisor_exit_and_kill() {
        let (mut proc, handle) = FakeSupervisor::new(5);
        assert_eq!(proc.id(), Some(5));
        assert_eq!(proc.try_exit().unwrap(), None);

        proc.kill().await.unwrap();
        assert!(handle.was_killed());
        assert!(handle.has_exited());
        assert_eq!(proc.wait().await.unwrap(), ExitSummary::signalled());
        assert_eq!(proc.id(), None);
    }

    #[tokio::test]
    async fn test_gated_sync_waits_for_release() {
        let root = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(FakeToolchain::gated());
        let dest = root.path().join("repo");

        let task = {
            let toolchain = toolchain.clone();
            let dest = dest.clone();
            tokio::spawn(async move { toolchain.clone_repo("u", &dest).await })
        };
        toolchain.wait_for_syncs(1).await;
        assert!(!dest.exists());

        toolchain.release_syncs(1);
        task.await.unwrap().unwrap();
        assert!(dest.is_dir());
        assert_eq!(toolchain.overlapping_syncs(), 0);
    }
}
