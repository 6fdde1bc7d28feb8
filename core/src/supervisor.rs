//! Worker process supervision
//!
//! Launches worker child processes, hands each one the socket path it must
//! serve and a one-shot readiness pipe, waits for the readiness byte with a
//! bounded timeout, and monitors liveness. A worker that exits is observed
//! by a monitor task which fires the registered exit handlers; the
//! dispatcher installs a handler that evicts the worker's registry entries,
//! the backstop against routing to a dead socket.
//!
//! Child-process contract (via environment):
//! - `INFERMUX_WORKER_SOCKET`: path the worker must bind and listen on
//! - `INFERMUX_READY_FD`: inherited descriptor number; the worker writes a
//!   single byte to it once it is accepting connections, then closes it

use crate::{Error, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};

/// Environment variable carrying the socket path the worker must serve.
pub const WORKER_SOCKET_ENV: &str = "INFERMUX_WORKER_SOCKET";

/// Environment variable carrying the readiness pipe descriptor number.
pub const READY_FD_ENV: &str = "INFERMUX_READY_FD";

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Process launched, readiness signal not yet received
    Spawning,
    /// Readiness byte received; worker is serving its socket
    Ready,
    /// Process exited or was stopped
    Dead,
}

/// How to launch one worker
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    /// Opaque worker identifier (also used by the exit backstop)
    pub worker_id: String,
    /// Program to execute
    pub command: String,
    /// Program arguments
    pub args: Vec<String>,
    /// Extra environment (e.g. shared-memory descriptor numbers)
    pub env: Vec<(String, String)>,
    /// Socket path the worker must serve; generated when not set
    pub socket_path: Option<PathBuf>,
}

impl WorkerSpec {
    /// Spec with just an id and a command line.
    pub fn new(worker_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            socket_path: None,
        }
    }
}

/// Supervisor timing configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Bound on waiting for the readiness byte
    pub ready_timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL on stop
    pub stop_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(10),
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// Handle to a supervised worker process
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    /// Worker identifier from the [`WorkerSpec`]
    pub worker_id: String,
    /// Child process id
    pub pid: u32,
    /// Socket path passed to the worker
    pub socket_path: PathBuf,
    state: Arc<RwLock<WorkerState>>,
    child: Arc<Mutex<Option<Child>>>,
    ready_pipe: Arc<Mutex<Option<std::os::fd::OwnedFd>>>,
}

impl WorkerHandle {
    /// Current lifecycle state.
    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Non-blocking check of child status.
    pub async fn is_alive(&self) -> bool {
        match self.child.lock().await.as_mut() {
            Some(child) => child.try_wait().ok().flatten().is_none(),
            None => false,
        }
    }
}

/// Spawns, readies, monitors and terminates worker processes.
pub struct WorkerSupervisor {
    config: SupervisorConfig,
    workers: Arc<RwLock<HashMap<String, WorkerHandle>>>,
    exit_handlers: Arc<RwLock<Vec<Box<dyn Fn(&str) + Send + Sync>>>>,
}

impl WorkerSupervisor {
    /// Create a supervisor.
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            workers: Arc::new(RwLock::new(HashMap::new())),
            exit_handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a handler invoked with the worker id when a worker exit is
    /// observed (not on explicit `stop`).
    pub async fn on_worker_exit<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.exit_handlers.write().await.push(Box::new(handler));
    }

    /// Launch a worker child process.
    pub async fn spawn(&self, spec: WorkerSpec) -> Result<WorkerHandle> {
        let socket_path = spec.socket_path.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!(
                "infermux-worker-{}.sock",
                uuid::Uuid::new_v4().simple()
            ))
        });
        // A stale socket file would make the worker's bind fail.
        let _ = std::fs::remove_file(&socket_path);

        let (read_fd, write_fd) = nix::unistd::pipe()
            .map_err(|e| Error::Worker(format!("failed to create readiness pipe: {}", e)))?;

        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .env(WORKER_SOCKET_ENV, &socket_path)
            .env(READY_FD_ENV, write_fd.as_raw_fd().to_string())
            .envs(spec.env.iter().cloned())
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            Error::Worker(format!("failed to spawn worker {}: {}", spec.worker_id, e))
        })?;

        // The child inherited the write end; only it may hold it now, so
        // that EOF on the read end tracks the child's lifetime.
        drop(write_fd);

        let pid = child.id().unwrap_or_default();

        if let Some(stderr) = child.stderr.take() {
            let worker_id = spec.worker_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(worker_id = %worker_id, "{}", line);
                }
            });
        }

        let handle = WorkerHandle {
            worker_id: spec.worker_id.clone(),
            pid,
            socket_path,
            state: Arc::new(RwLock::new(WorkerState::Spawning)),
            child: Arc::new(Mutex::new(Some(child))),
            ready_pipe: Arc::new(Mutex::new(Some(read_fd))),
        };

        self.workers
            .write()
            .await
            .insert(spec.worker_id.clone(), handle.clone());
        self.monitor(handle.clone());

        tracing::info!(
            worker_id = %spec.worker_id,
            pid = pid,
            socket = %handle.socket_path.display(),
            "spawned worker"
        );
        Ok(handle)
    }

    /// Wait for the worker's one-shot readiness byte.
    ///
    /// Transitions `Spawning -> Ready` on success. Timeout or EOF (the
    /// child exited before signalling) is a failure; the caller decides
    /// whether to stop the worker or abort startup.
    pub async fn wait_for_ready(&self, handle: &WorkerHandle) -> Result<()> {
        let pipe = handle
            .ready_pipe
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Worker("readiness signal already consumed".to_string()))?;

        let mut reader = tokio::fs::File::from_std(std::fs::File::from(pipe));
        let mut buf = [0u8; 16];

        match tokio::time::timeout(self.config.ready_timeout, reader.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => {
                *handle.state.write().await = WorkerState::Ready;
                tracing::info!(worker_id = %handle.worker_id, "worker ready");
                Ok(())
            }
            Ok(Ok(_)) => Err(Error::Worker(format!(
                "worker {} exited before signalling readiness",
                handle.worker_id
            ))),
            Ok(Err(e)) => Err(Error::Worker(format!(
                "failed to read readiness signal from worker {}: {}",
                handle.worker_id, e
            ))),
            Err(_) => Err(Error::Worker(format!(
                "worker {} not ready after {:?}",
                handle.worker_id, self.config.ready_timeout
            ))),
        }
    }

    /// Non-blocking liveness check by worker id.
    pub async fn is_alive(&self, worker_id: &str) -> bool {
        match self.workers.read().await.get(worker_id) {
            Some(handle) => handle.clone().is_alive().await,
            None => false,
        }
    }

    /// Handle for a supervised worker.
    pub async fn worker(&self, worker_id: &str) -> Option<WorkerHandle> {
        self.workers.read().await.get(worker_id).cloned()
    }

    /// Ids of all supervised workers.
    pub async fn worker_ids(&self) -> Vec<String> {
        self.workers.read().await.keys().cloned().collect()
    }

    /// Stop a worker: SIGTERM, poll for exit within the grace period, then
    /// SIGKILL and reap. Removes the worker's socket file.
    pub async fn stop(&self, worker_id: &str) -> Result<()> {
        let handle = match self.workers.write().await.remove(worker_id) {
            Some(handle) => handle,
            None => return Ok(()),
        };

        // Taking the child ends the monitor task without firing exit
        // handlers; an explicit stop is not a crash.
        let child = handle.child.lock().await.take();
        if let Some(mut child) = child {
            if let Some(pid) = child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }

            let deadline = tokio::time::Instant::now() + self.config.stop_grace;
            let mut exited = false;
            loop {
                if child.try_wait().ok().flatten().is_some() {
                    exited = true;
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }

            if !exited {
                tracing::warn!(worker_id = %worker_id, "worker ignored SIGTERM, killing");
                let _ = child.kill().await;
            }
        }

        *handle.state.write().await = WorkerState::Dead;
        let _ = std::fs::remove_file(&handle.socket_path);

        tracing::info!(worker_id = %worker_id, "worker stopped");
        Ok(())
    }

    /// Stop every supervised worker.
    pub async fn stop_all(&self) {
        let ids = self.worker_ids().await;
        for worker_id in ids {
            if let Err(e) = self.stop(&worker_id).await {
                tracing::error!(worker_id = %worker_id, error = %e, "failed to stop worker");
            }
        }
    }

    fn monitor(&self, handle: WorkerHandle) {
        let workers = Arc::clone(&self.workers);
        let handlers = Arc::clone(&self.exit_handlers);

        tokio::spawn(async move {
            loop {
                let exit_status = {
                    let mut guard = handle.child.lock().await;
                    let mut child = match guard.take() {
                        Some(child) => child,
                        // Stopped explicitly elsewhere.
                        None => return,
                    };
                    match child.try_wait() {
                        Ok(Some(status)) => Some(status),
                        Ok(None) => {
                            *guard = Some(child);
                            None
                        }
                        Err(e) => {
                            tracing::error!(
                                worker_id = %handle.worker_id,
                                error = %e,
                                "failed to poll worker status"
                            );
                            *guard = Some(child);
                            None
                        }
                    }
                };

                if let Some(status) = exit_status {
                    tracing::warn!(worker_id = %handle.worker_id, %status, "worker exited");

                    *handle.state.write().await = WorkerState::Dead;
                    let _ = std::fs::remove_file(&handle.socket_path);
                    workers.write().await.remove(&handle.worker_id);

                    for handler in handlers.read().await.iter() {
                        handler(&handle.worker_id);
                    }
                    return;
                }

                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });
    }
}
