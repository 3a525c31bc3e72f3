/// Lifecycle of the single supervised worker: spawn it in its own process
/// group, signal the whole group to stop, reap it, and delete its log file.
use crate::config::WorkerConfig;
use chrono::{DateTime, Utc};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};

/// Log file written by the worker, relative to the service working directory.
pub const LOG_ARTIFACT: &str = "counter.log";

/// Errors returned by [`ProcessManager`] operations.
#[derive(Debug)]
pub enum ProcessError {
    /// A worker is already supervised; starting another would leak it.
    AlreadyRunning { pid: u32 },
    /// Failed to launch the worker.
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// No worker is currently supervised.
    NotRunning,
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::AlreadyRunning { pid } => {
                write!(f, "worker already running with pid {}", pid)
            }
            ProcessError::Spawn { command, source } => {
                write!(f, "failed to spawn {}: {}", command, source)
            }
            ProcessError::NotRunning => write!(f, "no worker is running"),
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessError::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// The currently supervised worker.
#[derive(Debug)]
struct ManagedChild {
    /// Also the process group id, since the worker leads its own group.
    pid: u32,
    child: Child,
    started_at: DateTime<Utc>,
}

/// Outcome of a completed stop, for logging.
#[derive(Debug)]
pub struct StopReport {
    pub pid: u32,
    /// None if waiting on the worker failed.
    pub status: Option<ExitStatus>,
    /// True if the group had to be escalated to SIGKILL.
    pub killed: bool,
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Owns the handle to at most one worker process.
///
/// Not internally synchronized: callers share it behind a mutex and hold the
/// lock across each check-then-act sequence.
#[derive(Debug)]
pub struct ProcessManager {
    worker: WorkerConfig,
    log_path: PathBuf,
    kill_after: Option<Duration>,
    child: Option<ManagedChild>,
}

impl ProcessManager {
    pub fn new(worker: WorkerConfig, log_path: impl Into<PathBuf>) -> Self {
        let kill_after = worker.kill_after_secs.map(Duration::from_secs);
        Self {
            worker,
            log_path: log_path.into(),
            kill_after,
            child: None,
        }
    }

    /// Launch the worker with the given start value and return its pid.
    ///
    /// The worker gets its own process group so it and anything it spawns
    /// can be stopped together. Its stdout goes to ours; stdin and stderr
    /// are the null device.
    pub fn start(&mut self, start: i64) -> Result<u32, ProcessError> {
        if let Some(current) = &self.child {
            return Err(ProcessError::AlreadyRunning { pid: current.pid });
        }

        let args = self.worker.build_args(start);
        tracing::info!(command = %self.worker.command, args = ?args, start, "spawning worker");

        let spawn_error = |source: std::io::Error| ProcessError::Spawn {
            command: self.worker.command.clone(),
            source,
        };

        let child = Command::new(&self.worker.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(spawn_error)?;

        // A pid of 0 would make killpg target our own group.
        let pid = match child.id() {
            Some(pid) if pid > 0 => pid,
            _ => {
                return Err(spawn_error(std::io::Error::other(
                    "worker exited before its pid was recorded",
                )))
            }
        };

        tracing::info!(pid, "worker started");
        self.child = Some(ManagedChild {
            pid,
            child,
            started_at: Utc::now(),
        });
        Ok(pid)
    }

    /// Interrupt the worker's process group and wait for the worker to exit.
    ///
    /// The handle is cleared once the wait completes, whatever it reports.
    /// If the future is dropped mid-wait the handle stays in place, so a later
    /// stop signals and waits again.
    pub async fn stop(&mut self) -> Result<StopReport, ProcessError> {
        let Some(managed) = self.child.as_mut() else {
            return Err(ProcessError::NotRunning);
        };
        let pid = managed.pid;

        tracing::info!(pgid = pid, "interrupting worker process group");
        signal_group(pid, Signal::SIGINT);

        tracing::info!(pid, "waiting for worker to finish");
        let (status, killed) = match self.kill_after {
            None => (managed.child.wait().await, false),
            Some(limit) => match tokio::time::timeout(limit, managed.child.wait()).await {
                Ok(status) => (status, false),
                Err(_) => {
                    tracing::warn!(
                        pgid = pid,
                        after_secs = limit.as_secs(),
                        "worker ignored interrupt, killing process group"
                    );
                    signal_group(pid, Signal::SIGKILL);
                    (managed.child.wait().await, true)
                }
            },
        };

        let status = match status {
            Ok(status) => {
                tracing::info!(pid, %status, killed, "worker finished");
                Some(status)
            }
            Err(e) => {
                tracing::warn!(pid, "waiting for worker failed: {e}");
                None
            }
        };

        self.child = None;
        Ok(StopReport {
            pid,
            status,
            killed,
        })
    }

    /// True while a worker handle is held. Not an OS-level liveness probe.
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    pub fn status(&self) -> ProcessStatus {
        ProcessStatus {
            running: self.child.is_some(),
            pid: self.child.as_ref().map(|c| c.pid),
            started_at: self.child.as_ref().map(|c| c.started_at),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Delete the worker's log file. A missing file is not an error.
    pub async fn remove_log_artifact(&self) -> std::io::Result<()> {
        match tokio::fs::remove_file(&self.log_path).await {
            Ok(()) => {
                tracing::info!(path = %self.log_path.display(), "removed worker log");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.log_path.display(), "no worker log to remove");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Stop the worker if one is running.
    pub async fn close(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop().await {
                tracing::warn!("stopping worker on close: {e}");
            }
        }
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        if let Some(managed) = &self.child {
            tracing::warn!(pgid = managed.pid, "manager dropped with live worker, killing group");
            signal_group(managed.pid, Signal::SIGKILL);
        }
    }
}

/// Send a signal to a whole process group. Failures are logged, not returned:
/// the group may already be gone, and the subsequent wait reaps the leader.
fn signal_group(pgid: u32, signal: Signal) {
    match killpg(Pid::from_raw(pgid as i32), signal) {
        Ok(()) => tracing::debug!(pgid, ?signal, "signalled process group"),
        Err(e) => tracing::warn!(pgid, ?signal, "failed to signal process group: {e}"),
    }
}
