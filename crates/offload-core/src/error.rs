//! Error types for offload-core.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for offload-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in offload-core.
///
/// Failures of the code running *inside* a worker are not represented here:
/// they travel back as data in [`crate::ExecutionResult`]. These variants
/// cover configuration, bundling and the pool/transport layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid pool or executor configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// No function registered under this processor and name.
    #[error("function '{name}' is not registered under processor '{processor}'")]
    FunctionNotFound { processor: String, name: String },

    /// Bundle entry point does not exist.
    #[error("entry point not found: {}", .0.display())]
    EntryNotFound(PathBuf),

    /// The bundler rejected the entry point (syntax or resolution error).
    #[error("bundle failed for {}: {message}", entry.display())]
    Bundle { entry: PathBuf, message: String },

    /// External toolchain (esbuild, worker binary) missing or unusable.
    #[error("toolchain error: {0}")]
    Toolchain(String),

    /// IPC communication error with worker process.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Worker process died or stopped answering while running a task.
    #[error("worker {pid} lost: {message}")]
    WorkerLost { pid: u32, message: String },

    /// Submission raced with pool shutdown.
    #[error("worker pool is shut down")]
    PoolClosed,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error stems from configuration rather than from a task.
    ///
    /// Configuration errors are surfaced to the submitter immediately and
    /// should never be retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::FunctionNotFound { .. }
                | Self::EntryNotFound(_)
                | Self::Toolchain(_)
        )
    }

    /// Render the error together with a recovery hint for terminal output.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Self::Config(_) => {
                Some("check OFFLOAD_MIN_WORKERS / OFFLOAD_MAX_WORKERS and the CLI flags")
            }
            Self::EntryNotFound(_) => Some("the entry path is resolved relative to the working directory"),
            Self::Toolchain(msg) if msg.contains("esbuild") => {
                Some("install esbuild (`npm i -D esbuild`) or set OFFLOAD_ESBUILD_PATH")
            }
            Self::Toolchain(_) => {
                Some("build the worker with `cargo build -p offload-worker` or set OFFLOAD_WORKER_PATH")
            }
            Self::WorkerLost { .. } => {
                Some("the worker process exited mid-task; the next task will start a fresh one")
            }
            _ => None,
        };

        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}
