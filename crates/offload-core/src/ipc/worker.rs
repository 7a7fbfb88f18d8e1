//! Parent-side handles on `offload-worker` processes.
//!
//! A [`WorkerHandle`] owns the child and its pipes and is used by exactly one
//! thread at a time. A [`WorkerKillHandle`] only knows the pid, so pool
//! shutdown can terminate a worker whose handle is blocked in [`WorkerHandle::run_task`].

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::task::ErrorKind;
use crate::telemetry::MemorySnapshot;

use super::protocol::{
    TaskSpec, WireError, WorkerCommand, WorkerReport, WorkerResponse, read_message, write_message,
};

/// Environment variable carrying the dependency search path to workers.
pub const MODULE_PATH_ENV: &str = "OFFLOAD_MODULE_PATH";

/// Environment variable overriding the worker binary location.
pub const WORKER_PATH_ENV: &str = "OFFLOAD_WORKER_PATH";

/// Time a worker gets to act on `Shutdown` before it is killed.
const KILL_GRACE: Duration = Duration::from_millis(10);

const WORKER_BINARY: &str = if cfg!(windows) {
    "offload-worker.exe"
} else {
    "offload-worker"
};

/// How to start a worker process.
#[derive(Debug, Clone, Default)]
pub struct WorkerSpawnConfig {
    /// Explicit worker binary. Falls back to [`WorkerHandle::find_worker_binary`].
    pub binary: Option<PathBuf>,
    /// Directories searched for injected dependencies.
    pub module_paths: Vec<PathBuf>,
}

/// One running worker process. Killed on drop.
pub struct WorkerHandle {
    child: Child,
    /// Command frames go here.
    stdin: BufWriter<ChildStdin>,
    /// Response frames come from here.
    stdout: BufReader<ChildStdout>,
    /// Set once the process was terminated; the pipes are dead afterwards.
    killed: bool,
    tasks_completed: u64,
}

impl WorkerHandle {
    /// Spawn a new worker process and wait for it to answer a ping.
    pub fn spawn(config: &WorkerSpawnConfig) -> Result<Self> {
        let worker_path = match &config.binary {
            Some(path) if path.exists() => path.clone(),
            Some(path) => {
                return Err(Error::Toolchain(format!(
                    "Configured worker binary does not exist: {}",
                    path.display()
                )));
            }
            None => Self::find_worker_binary()?,
        };

        let mut command = Command::new(&worker_path);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            // Worker logs and JS console output share the parent's stderr
            .stderr(Stdio::inherit());

        if !config.module_paths.is_empty() {
            let joined = std::env::join_paths(&config.module_paths)
                .map_err(|e| Error::Config(format!("Invalid module path: {}", e)))?;
            command.env(MODULE_PATH_ENV, joined);
        }

        let mut child = command.spawn().map_err(|e| {
            Error::Toolchain(format!("Cannot start {}: {}", worker_path.display(), e))
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(Error::Ipc("Worker pipes were not set up".to_string()));
        };

        let mut handle = Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            killed: false,
            tasks_completed: 0,
        };

        // The engine is up once the worker answers
        handle.send_command(&WorkerCommand::Ping)?;
        match handle.recv_response()? {
            WorkerResponse::Pong { pid } => {
                tracing::debug!(pid, path = %worker_path.display(), "Worker ready");
                Ok(handle)
            }
            other => Err(Error::Ipc(format!("Expected Pong from new worker, got {:?}", other))),
        }
    }

    /// Locate the `offload-worker` binary.
    ///
    /// Checked in order: `OFFLOAD_WORKER_PATH`, the directory of the running
    /// executable and its parent (test binaries live in `deps/`), `PATH`, then
    /// the workspace `target/{debug,release}` directories.
    pub fn find_worker_binary() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(WORKER_PATH_ENV).map(PathBuf::from)
            && path.exists()
        {
            return Ok(path);
        }

        if let Ok(exe_path) = std::env::current_exe()
            && let Some(exe_dir) = exe_path.parent()
        {
            let sibling = [Some(exe_dir), exe_dir.parent()]
                .into_iter()
                .flatten()
                .map(|dir| dir.join(WORKER_BINARY))
                .find(|candidate| candidate.exists());
            if let Some(path) = sibling {
                return Ok(path);
            }
        }

        if let Ok(path) = which::which(WORKER_BINARY) {
            return Ok(path);
        }

        if let Some(manifest_dir) = std::env::var_os("CARGO_MANIFEST_DIR") {
            let target_dir = Path::new(&manifest_dir).join("../../target");
            for profile in ["debug", "release"] {
                let path = target_dir.join(profile).join(WORKER_BINARY);
                if path.exists() {
                    return Ok(path.canonicalize().unwrap_or(path));
                }
            }
        }

        Err(Error::Toolchain(format!(
            "{} not found; set {} or put it on PATH",
            WORKER_BINARY, WORKER_PATH_ENV
        )))
    }

    fn ensure_running(&self) -> Result<()> {
        if self.killed {
            return Err(Error::Ipc(format!("worker {} was terminated", self.pid())));
        }
        Ok(())
    }

    /// Write one command frame.
    pub fn send_command(&mut self, cmd: &WorkerCommand) -> Result<()> {
        self.ensure_running()?;
        write_message(&mut self.stdin, cmd)
    }

    /// Block until the next response frame arrives.
    pub fn recv_response(&mut self) -> Result<WorkerResponse> {
        self.ensure_running()?;
        read_message(&mut self.stdout)
    }

    /// Run one task to completion on this worker.
    ///
    /// Task failures come back inside the report. An `Err` means the worker
    /// itself is unusable (crashed, killed, or broke the protocol).
    pub fn run_task(&mut self, task: TaskSpec) -> Result<WorkerReport> {
        let target = task.target.clone();
        let pid = self.pid();

        self.send_command(&WorkerCommand::Execute { task })
            .map_err(|e| self.lost(e))?;

        let response = self.recv_response().map_err(|e| self.lost(e))?;
        self.tasks_completed += 1;

        match response {
            WorkerResponse::Report(report) => Ok(report),
            WorkerResponse::Error { message } => Ok(internal_failure(message, None, target)),
            WorkerResponse::Panic { message } => {
                // The worker exits after reporting a panic; make sure it is not reused
                tracing::error!(pid, "Worker panicked: {}", message);
                let _ = self.kill();
                Ok(internal_failure(
                    format!("Worker panicked: {}", message),
                    None,
                    target,
                ))
            }
            other => Err(Error::Ipc(format!("Expected a task report, got {:?}", other))),
        }
    }

    /// Map a transport failure into `WorkerLost`, including the exit status if known.
    fn lost(&mut self, err: Error) -> Error {
        let status = match self.child.try_wait() {
            Ok(Some(status)) => format!(" (exit status: {})", status),
            _ => String::new(),
        };
        Error::WorkerLost {
            pid: self.pid(),
            message: format!("{}{}", err, status),
        }
    }

    /// Terminate the process and reap it. Idempotent.
    ///
    /// The worker gets a `Shutdown` frame and a short grace period before
    /// the kill, so an idle engine can exit on its own.
    pub fn kill(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.killed, true) {
            return Ok(());
        }

        let _ = write_message(&mut self.stdin, &WorkerCommand::Shutdown);
        std::thread::sleep(KILL_GRACE);

        match self.child.kill() {
            // InvalidInput: already exited
            Err(e) if e.kind() != std::io::ErrorKind::InvalidInput => {
                tracing::warn!(pid = self.pid(), "Could not kill worker: {}", e);
            }
            _ => {}
        }
        let _ = self.child.wait();
        Ok(())
    }

    /// Whether the process is still running and has not been killed.
    pub fn is_alive(&mut self) -> bool {
        !self.killed && matches!(self.child.try_wait(), Ok(None))
    }

    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Number of tasks this worker has completed.
    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed
    }

    /// Ask the worker to exit and wait for it. Consumes the handle.
    pub fn shutdown(mut self) -> Result<()> {
        if self.killed {
            return Ok(());
        }

        let _ = self.send_command(&WorkerCommand::Shutdown);
        if let Ok(WorkerResponse::ShuttingDown) = self.recv_response() {
            tracing::trace!(pid = self.pid(), "Worker acknowledged shutdown");
        }

        let result = match self.child.wait() {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(Error::Ipc(format!("Worker exited with status: {}", status))),
            Err(e) => Err(Error::Ipc(format!("waiting for worker exit failed: {}", e))),
        };
        self.killed = true;
        result
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.kill();
    }
}

fn internal_failure(message: String, trace: Option<String>, target: String) -> WorkerReport {
    WorkerReport {
        success: false,
        value_json: None,
        error: Some(WireError {
            kind: ErrorKind::Internal,
            message,
            trace,
        }),
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
        memory: MemorySnapshot::default(),
        dependencies_loaded: None,
        bundle_size_bytes: None,
        target_name: Some(target),
    }
}

/// Pid-only handle that can SIGKILL a busy worker from any thread.
///
/// Clones share the "already killed" flag, so the signal is sent once.
#[derive(Debug, Clone)]
pub struct WorkerKillHandle {
    pid: u32,
    killed: Arc<AtomicBool>,
}

impl WorkerKillHandle {
    /// Kill handle targeting `worker`'s process.
    pub fn new(worker: &WorkerHandle) -> Self {
        Self {
            pid: worker.pid(),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Send SIGKILL. The thread blocked in [`WorkerHandle::run_task`] then
    /// sees a broken pipe and reports [`Error::WorkerLost`].
    pub fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }

        #[cfg(unix)]
        {
            // SAFETY: plain signal delivery to a pid; errors (ESRCH) are harmless here.
            let rc = unsafe { libc::kill(self.pid as libc::pid_t, libc::SIGKILL) };
            if rc != 0 {
                tracing::debug!(pid = self.pid, "Worker already gone");
            }
        }

        #[cfg(not(unix))]
        {
            tracing::warn!(
                pid = self.pid,
                "Killing a busy worker is not supported on this platform"
            );
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_configured_binary_is_toolchain_error() {
        let config = WorkerSpawnConfig {
            binary: Some(PathBuf::from("/definitely/not/offload-worker")),
            module_paths: Vec::new(),
        };

        match WorkerHandle::spawn(&config) {
            Err(Error::Toolchain(msg)) => assert!(msg.contains("does not exist")),
            Err(other) => panic!("Unexpected error: {}", other),
            Ok(_) => panic!("Spawn should fail"),
        }
    }

    #[test]
    fn test_internal_failure_report() {
        let report = internal_failure("bad request".to_string(), None, "f".to_string());
        assert!(!report.success);
        assert_eq!(report.error.unwrap().kind, ErrorKind::Internal);
        assert_eq!(report.target_name.as_deref(), Some("f"));
    }
}
