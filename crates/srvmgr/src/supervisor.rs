use std::time::Duration;

use anyhow::Context;
use srvmgr_process::{LaunchMode, OperationResult, ProcessState, StatusReport};

use crate::{
    error::LaunchError,
    launch::{self, Launcher, Toolchain},
    log_sink,
    pid_store::PidStore,
    probe::ProcessProbe,
    readiness::ReadinessWaiter,
    settings::ServerLayout,
};

/// Start/stop/restart for the one managed server slot.
///
/// Each call runs to completion; nothing is kept between calls except what the
/// [`PidStore`] holds.
pub struct Supervisor<P, S, L> {
    probe: P,
    store: S,
    launcher: L,
    layout: ServerLayout,
    toolchain: Toolchain,
    readiness: ReadinessWaiter,
    restart_pause: Duration,
}

impl<P, S, L> Supervisor<P, S, L>
where
    P: ProcessProbe,
    S: PidStore,
    L: Launcher,
{
    pub fn new(
        probe: P,
        store: S,
        launcher: L,
        layout: ServerLayout,
        toolchain: Toolchain,
        readiness: ReadinessWaiter,
        restart_pause: Duration,
    ) -> Self {
        Self {
            probe,
            store,
            launcher,
            layout,
            toolchain,
            readiness,
            restart_pause,
        }
    }

    pub fn layout(&self) -> &ServerLayout {
        &self.layout
    }

    fn current_state(&self) -> ProcessState {
        ProcessState::classify(self.store.read(), |pid| self.probe.is_alive(pid))
    }

    pub async fn start(
        &self,
        port: u16,
        mode: LaunchMode,
        wait: bool,
    ) -> anyhow::Result<OperationResult> {
        match self.current_state() {
            ProcessState::Running { pid } => {
                tracing::info!(pid, "already running; not spawning");
                return Ok(OperationResult::AlreadyRunning { pid });
            }
            ProcessState::Stale { pid } => {
                tracing::info!(pid, "tracked pid is gone; starting fresh");
            }
            ProcessState::Stopped => {}
        }

        // Rotate before any build so build output lands in the new log.
        log_sink::rotate(&self.layout.log_file());

        if mode == LaunchMode::Production {
            self.ensure_artifact().await?;
        }

        let spec = launch::plan_launch(&self.layout, &self.toolchain, mode, port);
        let pid = self
            .launcher
            .spawn(&spec)
            .await
            .with_context(|| format!("start server ({mode})"))?;
        tracing::info!(pid, port, %mode, log = %spec.log_path.display(), "server spawned");

        // Record before waiting so an interrupted wait still leaves the pid behind.
        if let Err(e) = self.store.write(pid) {
            tracing::warn!(pid, error = %e, "failed to record pid; stop will fall back to the port");
        }

        let ready = if wait {
            let ok = self.readiness.wait(port, &self.probe).await;
            if ok {
                tracing::info!(pid, port, "server is accepting connections");
            } else {
                tracing::warn!(
                    pid,
                    port,
                    timeout_ms = self.readiness.timeout.as_millis() as u64,
                    "server did not become ready before the timeout"
                );
            }
            Some(ok)
        } else {
            None
        };

        Ok(OperationResult::Started { pid, mode, ready })
    }

    async fn ensure_artifact(&self) -> anyhow::Result<()> {
        let build = launch::plan_build(&self.layout, &self.toolchain);
        if build.artifact.exists() {
            return Ok(());
        }
        self.launcher
            .build(&build)
            .await
            .context("build server artifact")?;
        if !build.artifact.exists() {
            return Err(LaunchError::ArtifactMissing {
                path: build.artifact,
            })
            .context("build server artifact");
        }
        Ok(())
    }

    /// Never fails: a missing process is `NotRunning`, and kill errors are
    /// ignored. The PID record is always cleared.
    pub fn stop(&self, port: u16) -> OperationResult {
        let mut killed = Vec::new();

        match self.current_state() {
            ProcessState::Running { pid } => {
                self.probe.kill_tree(pid);
                killed.push(pid);
            }
            state => {
                if let ProcessState::Stale { pid } = state {
                    tracing::info!(pid, "tracked pid is gone; checking port owners");
                }
                for pid in self.probe.listening_pids(port) {
                    tracing::info!(pid, port, "killing untracked port owner");
                    self.probe.kill_tree(pid);
                    killed.push(pid);
                }
            }
        }

        self.store.clear();

        if killed.is_empty() {
            OperationResult::NotRunning
        } else {
            OperationResult::Stopped { killed }
        }
    }

    pub async fn restart(
        &self,
        port: u16,
        mode: LaunchMode,
        wait: bool,
    ) -> anyhow::Result<OperationResult> {
        let stopped = self.stop(port);
        tracing::debug!(?stopped, "restart: stop phase done");
        // Let the OS release the port and file handles.
        tokio::time::sleep(self.restart_pause).await;
        self.start(port, mode, wait).await
    }

    /// Read-only: classifies the slot without spawning, killing, or clearing.
    pub fn status(&self, port: u16) -> StatusReport {
        StatusReport {
            state: self.current_state(),
            port,
            listeners: self.probe.listening_pids(port).into_iter().collect(),
        }
    }
}
