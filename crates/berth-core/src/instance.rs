// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process supervisor for a single application version.
//!
//! An [`AppInstance`] owns exactly one OS process lifecycle, bound to one
//! immutable version directory and one environment map. Instances are never
//! reused across versions: switching versions discards the old instance and
//! constructs a new one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::manifest::Manifest;

/// How long a stopped process gets to exit after SIGTERM before SIGKILL.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Immutable launch parameters of one instance.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    /// Version directory the process runs in.
    pub version_path: PathBuf,
    /// Stdout log file, in the app root so it survives version switches.
    pub log_out: PathBuf,
    /// Stderr log file, in the app root so it survives version switches.
    pub log_err: PathBuf,
    /// Environment from the app's config, applied to the process.
    pub env: HashMap<String, String>,
}

/// Lifecycle state of the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// No process has ever been spawned.
    Idle,
    /// The process is being spawned.
    Starting,
    /// The process was observed up.
    Running,
    /// A stop was requested and the process has not yet exited.
    Stopping,
    /// The process exited after an explicit stop (or with success).
    Stopped,
    /// The process exited unexpectedly with a failure status.
    Crashed,
}

impl InstanceState {
    /// Whether the instance counts as started.
    pub fn started(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// Whether the instance counts as stopped.
    pub fn stopped(self) -> bool {
        matches!(self, Self::Idle | Self::Stopped | Self::Crashed)
    }
}

/// Point-in-time status of an instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    /// Environment the instance was configured with.
    pub env: HashMap<String, String>,
    /// Whether the OS process is alive right now (derived, never stored).
    pub running: bool,
    /// Whether the instance was started.
    pub started: bool,
    /// Whether the instance is stopped.
    pub stopped: bool,
}

/// Supervisor for one OS process running one application version.
#[derive(Debug)]
pub struct AppInstance {
    spec: InstanceSpec,
    manifest: Option<Manifest>,
    child: Option<Child>,
    state: InstanceState,
}

impl AppInstance {
    /// Create a supervisor bound to one version directory. No filesystem or
    /// process work happens until [`init`](Self::init) or
    /// [`start`](Self::start).
    pub fn new(spec: InstanceSpec) -> Self {
        Self {
            spec,
            manifest: None,
            child: None,
            state: InstanceState::Idle,
        }
    }

    /// Read the version's manifest and prepare the start command without
    /// spawning anything.
    pub async fn init(&mut self) -> Result<()> {
        let manifest = Manifest::load(&self.spec.version_path).await?;
        debug!(
            path = %self.spec.version_path.display(),
            command = %manifest.command,
            "instance initialized"
        );
        self.manifest = Some(manifest);
        Ok(())
    }

    /// Start the supervised process.
    ///
    /// Idempotent: starting an already-started instance is a no-op. Runs
    /// [`init`](Self::init) first if it has not happened yet. Completes only
    /// once the process is observably up; a process that dies on spawn fails
    /// with [`Error::StartFailed`].
    pub async fn start(&mut self) -> Result<()> {
        if self.manifest.is_none() {
            self.init().await?;
        }
        self.reap();

        if self.state.started() {
            return Ok(());
        }

        // init() above guarantees the manifest is present
        let manifest = match &self.manifest {
            Some(m) => m.clone(),
            None => return Err(Error::NoValidInstance),
        };

        self.state = InstanceState::Starting;

        let stdout = append_log(&self.spec.log_out)?;
        let stderr = append_log(&self.spec.log_err)?;

        let mut cmd = Command::new(&manifest.command);
        cmd.args(&manifest.args)
            .current_dir(&self.spec.version_path)
            .envs(&self.spec.env)
            .envs(&manifest.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(false);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.state = InstanceState::Idle;
                return Err(Error::StartFailed(format!("{}: {}", manifest.command, e)));
            }
        };

        // Catch processes that die immediately (bad command line, missing
        // interpreter) instead of reporting a successful start.
        match child.try_wait() {
            Ok(Some(status)) if !status.success() => {
                error!(
                    path = %self.spec.version_path.display(),
                    %status,
                    "process exited at startup"
                );
                self.child = Some(child);
                self.state = InstanceState::Crashed;
                return Err(Error::StartFailed(format!(
                    "process exited at startup with {status}"
                )));
            }
            Ok(Some(status)) => {
                info!(
                    path = %self.spec.version_path.display(),
                    %status,
                    "process completed immediately"
                );
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "could not check process status after spawn");
            }
        }

        info!(
            path = %self.spec.version_path.display(),
            pid = child.id(),
            "process started"
        );
        self.child = Some(child);
        self.state = InstanceState::Running;
        Ok(())
    }

    /// Stop the supervised process.
    ///
    /// Fails with [`Error::NotStarted`] if no process was ever spawned.
    /// Idempotent: stopping an already-stopped instance is a no-op. Sends
    /// SIGTERM, waits for exit, and escalates to SIGKILL after a grace
    /// period. Completes only once the exit status has been reaped.
    pub async fn stop(&mut self) -> Result<()> {
        self.reap();

        let Some(child) = self.child.as_mut() else {
            return Err(Error::NotStarted);
        };

        if self.state.stopped() {
            return Ok(());
        }

        self.state = InstanceState::Stopping;

        if let Some(pid) = child.id() {
            // ESRCH just means the process is already gone
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        let status = match tokio::time::timeout(STOP_GRACE, child.wait()).await {
            Ok(waited) => waited?,
            Err(_elapsed) => {
                warn!(
                    path = %self.spec.version_path.display(),
                    "process ignored SIGTERM, killing"
                );
                child.start_kill()?;
                child.wait().await?
            }
        };

        info!(
            path = %self.spec.version_path.display(),
            %status,
            "process stopped"
        );
        self.state = InstanceState::Stopped;
        Ok(())
    }

    /// Current status. Never fails.
    pub fn status(&mut self) -> InstanceStatus {
        self.reap();
        InstanceStatus {
            env: self.spec.env.clone(),
            running: self.running(),
            started: self.state.started(),
            stopped: self.state.stopped(),
        }
    }

    /// Whether the OS process is alive, derived from the live child handle.
    fn running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Observe an exit that happened behind our back. Unexpected exits are
    /// logged and reflected in the state; no restart is attempted.
    fn reap(&mut self) {
        if self.state != InstanceState::Running {
            return;
        }
        let Some(child) = self.child.as_mut() else {
            return;
        };
        if let Ok(Some(status)) = child.try_wait() {
            if status.success() {
                info!(
                    path = %self.spec.version_path.display(),
                    %status,
                    "process exited"
                );
                self.state = InstanceState::Stopped;
            } else {
                warn!(
                    path = %self.spec.version_path.display(),
                    %status,
                    "process exited unexpectedly"
                );
                self.state = InstanceState::Crashed;
            }
        }
    }
}

/// Open a log file for appending, creating it if needed.
fn append_log(path: &std::path::Path) -> Result<std::fs::File> {
    Ok(std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?)
}
