//! Task and result types shared by the pool, the worker and callers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::ipc::{TaskSpec, WorkerReport};
use crate::telemetry::MemorySnapshot;

/// Invocation protocol a task is routed to inside the worker.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum TaskMode {
    /// Raw function source with injected dependencies; deferred results are awaited.
    InjectedFunction,
    /// Raw function source with injected dependencies; the target must return immediately.
    InjectedFunctionSync,
    /// Self-contained bundle evaluated in a fresh module scope.
    Bundle,
}

impl TaskMode {
    /// Whether the mode takes a dependency list.
    pub fn injects_dependencies(self) -> bool {
        matches!(self, Self::InjectedFunction | Self::InjectedFunctionSync)
    }
}

/// A unit of work submitted to the pool.
///
/// Tasks are moved into the pool on submission and dropped once their result
/// has been delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub mode: TaskMode,
    /// Function source text, or bundled unit code for [`TaskMode::Bundle`].
    pub source: String,
    /// Name of the function to invoke.
    pub target: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Dependencies to inject, in parameter order. Ignored for bundles.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Task {
    /// Injected-function task awaiting deferred results.
    pub fn injected(
        source: impl Into<String>,
        target: impl Into<String>,
        args: Vec<Value>,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            mode: TaskMode::InjectedFunction,
            source: source.into(),
            target: target.into(),
            args,
            dependencies,
        }
    }

    /// Injected-function task whose target must return synchronously.
    pub fn injected_sync(
        source: impl Into<String>,
        target: impl Into<String>,
        args: Vec<Value>,
        dependencies: Vec<String>,
    ) -> Self {
        Self {
            mode: TaskMode::InjectedFunctionSync,
            ..Self::injected(source, target, args, dependencies)
        }
    }

    /// Task running an already bundled unit.
    pub fn bundle(code: impl Into<String>, target: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            mode: TaskMode::Bundle,
            source: code.into(),
            target: target.into(),
            args,
            dependencies: Vec::new(),
        }
    }

    /// Convert into the wire form sent to a worker.
    pub(crate) fn into_spec(self) -> Result<TaskSpec> {
        let args_json = serde_json::to_string(&self.args)
            .map_err(|e| Error::Serialization(format!("Failed to encode task arguments: {}", e)))?;

        let dependencies = if self.mode.injects_dependencies() {
            self.dependencies
        } else {
            Vec::new()
        };

        Ok(TaskSpec {
            mode: self.mode,
            source: self.source,
            target: self.target,
            args_json,
            dependencies,
        })
    }
}

/// Classification of a failed task.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Source or bundle failed to compile.
    Compile,
    /// The target threw while executing.
    Runtime,
    /// Target name is not a callable export of the bundle.
    ExportNotFound,
    /// The returned value could not be transferred back.
    Serialization,
    /// Worker-side infrastructure failure (engine panic, malformed request).
    Internal,
}

/// Outcome of a task, returned to callers.
///
/// A failed task is a normal value, not an `Err`: callers surface
/// `success == false` to their own clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_trace: Option<String>,
    /// Completion time, taken inside the worker.
    pub timestamp: DateTime<Utc>,
    /// Worker memory at completion.
    pub memory: MemorySnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies_loaded: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_pid: Option<u32>,
    /// Round trip as seen by the pool, including IPC.
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Failure produced on the caller's side, before any worker was involved
    /// (e.g. a bundle compile error).
    pub fn local_failure(kind: ErrorKind, message: impl Into<String>, trace: Option<String>) -> Self {
        Self {
            success: false,
            value: None,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            error_trace: trace,
            timestamp: Utc::now(),
            memory: MemorySnapshot::capture(),
            dependencies_loaded: None,
            bundle_size_bytes: None,
            target_name: None,
            worker_pid: None,
            duration_ms: 0,
        }
    }

    /// Build the caller-facing result from a worker report.
    pub(crate) fn from_report(report: WorkerReport, pid: u32, elapsed: Duration) -> Result<Self> {
        let value = match report.value_json {
            Some(json) if report.success => Some(serde_json::from_str(&json).map_err(|e| {
                Error::Deserialization(format!("Worker {} returned invalid JSON: {}", pid, e))
            })?),
            _ if report.success => Some(Value::Null),
            _ => None,
        };

        let (error_kind, error_message, error_trace) = match report.error {
            Some(err) => (Some(err.kind), Some(err.message), err.trace),
            None => (None, None, None),
        };

        let timestamp = DateTime::from_timestamp_millis(report.timestamp_ms).unwrap_or_else(Utc::now);

        Ok(Self {
            success: report.success,
            value,
            error_kind,
            error_message,
            error_trace,
            timestamp,
            memory: report.memory,
            dependencies_loaded: report.dependencies_loaded,
            bundle_size_bytes: report.bundle_size_bytes,
            target_name: report.target_name,
            worker_pid: Some(pid),
            duration_ms: elapsed.as_millis() as u64,
        })
    }
}
