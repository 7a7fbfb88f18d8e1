//! Messages exchanged between the pool and `offload-worker`.
//!
//! Each frame on the worker's stdin/stdout is a little-endian `u32` byte
//! count followed by that many bytes of rkyv archive.

use std::io::{Read, Write};

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::task::{ErrorKind, TaskMode};
use crate::telemetry::MemorySnapshot;

/// Frames larger than this are rejected as corrupt.
const MAX_MESSAGE_BYTES: usize = 100 * 1024 * 1024;

/// Task as it travels to the worker.
///
/// Arguments stay JSON text on the wire; the worker hands them to the
/// engine without an intermediate Rust representation.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct TaskSpec {
    pub mode: TaskMode,
    pub source: String,
    pub target: String,
    /// JSON array of positional arguments.
    pub args_json: String,
    pub dependencies: Vec<String>,
}

/// Failure details reported by a worker.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
    pub trace: Option<String>,
}

/// Outcome of one task as produced inside the worker.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct WorkerReport {
    pub success: bool,
    /// JSON encoding of the returned value (success only).
    pub value_json: Option<String>,
    pub error: Option<WireError>,
    /// Completion time in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub memory: MemorySnapshot,
    pub dependencies_loaded: Option<Vec<String>>,
    pub bundle_size_bytes: Option<u64>,
    pub target_name: Option<String>,
}

/// Parent to worker.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum WorkerCommand {
    /// Run one task and reply with a report.
    Execute { task: TaskSpec },

    /// Finish the loop and exit with status 0.
    Shutdown,

    /// Liveness check, answered with [`WorkerResponse::Pong`].
    Ping,
}

/// Worker to parent.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum WorkerResponse {
    /// Task finished, successfully or not.
    Report(WorkerReport),

    /// The request itself could not be handled.
    Error { message: String },

    /// The engine panicked mid-task. The worker exits right after sending this.
    Panic { message: String },

    Pong { pid: u32 },

    /// Sent in reply to [`WorkerCommand::Shutdown`], just before exiting.
    ShuttingDown,
}

fn transport(stage: &str, err: std::io::Error) -> Error {
    Error::Ipc(format!("{} failed: {}", stage, err))
}

/// Encode `message` and write it as one frame, flushing afterwards.
pub fn write_message<W: Write>(
    writer: &mut W,
    message: &impl for<'a> Serialize<
        rkyv::rancor::Strategy<
            rkyv::ser::Serializer<
                rkyv::util::AlignedVec,
                rkyv::ser::allocator::ArenaHandle<'a>,
                rkyv::ser::sharing::Share,
            >,
            rkyv::rancor::Error,
        >,
    >,
) -> Result<()> {
    let payload = rkyv::to_bytes::<rkyv::rancor::Error>(message)
        .map_err(|e| Error::Serialization(format!("cannot archive frame: {}", e)))?;
    if payload.len() > MAX_MESSAGE_BYTES {
        return Err(Error::Serialization(format!(
            "frame of {} bytes exceeds the {} byte limit",
            payload.len(),
            MAX_MESSAGE_BYTES
        )));
    }

    let header = (payload.len() as u32).to_le_bytes();
    writer.write_all(&header).map_err(|e| transport("frame header write", e))?;
    writer.write_all(&payload).map_err(|e| transport("frame payload write", e))?;
    writer.flush().map_err(|e| transport("frame flush", e))
}

/// Read one frame and decode it as `T`.
///
/// Decoding skips validation: frames only ever come from the parent or from
/// a worker it spawned. Running out of input is an [`Error::Ipc`], which the
/// worker loop treats as its parent having gone away.
pub fn read_message<R: Read, T>(reader: &mut R) -> Result<T>
where
    T: Archive,
    T::Archived: Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).map_err(|e| transport("frame header read", e))?;

    let size = u32::from_le_bytes(header) as usize;
    if size > MAX_MESSAGE_BYTES {
        return Err(Error::Ipc(format!(
            "frame of {} bytes exceeds the {} byte limit",
            size, MAX_MESSAGE_BYTES
        )));
    }

    let mut payload = rkyv::util::AlignedVec::<16>::with_capacity(size);
    payload.resize(size, 0);
    reader.read_exact(&mut payload).map_err(|e| transport("frame payload read", e))?;

    // SAFETY: the peer is our own parent or child process, built from this crate.
    unsafe { rkyv::from_bytes_unchecked::<T, rkyv::rancor::Error>(&payload) }
        .map_err(|e| Error::Deserialization(format!("cannot decode frame: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> TaskSpec {
        TaskSpec {
            mode: TaskMode::InjectedFunction,
            source: "function add(a, b) { return a + b }".to_string(),
            target: "add".to_string(),
            args_json: "[1,2]".to_string(),
            dependencies: vec!["lodash".to_string()],
        }
    }

    #[test]
    fn test_execute_frame_carries_task() {
        let mut frames = Vec::new();
        write_message(&mut frames, &WorkerCommand::Execute { task: sample_task() }).unwrap();

        let size = u32::from_le_bytes(frames[..4].try_into().unwrap()) as usize;
        assert_eq!(size, frames.len() - 4);

        let task = match read_message::<_, WorkerCommand>(&mut frames.as_slice()).unwrap() {
            WorkerCommand::Execute { task } => task,
            other => panic!("Expected Execute, got {:?}", other),
        };
        assert_eq!(task, sample_task());
    }

    #[test]
    fn test_failure_report_roundtrip() {
        let report = WorkerReport {
            success: false,
            value_json: None,
            error: Some(WireError {
                kind: ErrorKind::ExportNotFound,
                message: "Function 'missing' not found or not a function. Available functions: [f]"
                    .to_string(),
                trace: None,
            }),
            timestamp_ms: 1_700_000_000_000,
            memory: MemorySnapshot {
                resident_bytes: 1024,
                virtual_bytes: 4096,
                peak_resident_bytes: 2048,
            },
            dependencies_loaded: None,
            bundle_size_bytes: Some(27),
            target_name: Some("missing".to_string()),
        };

        let mut frames = Vec::new();
        write_message(&mut frames, &WorkerResponse::Report(report.clone())).unwrap();

        match read_message::<_, WorkerResponse>(&mut frames.as_slice()).unwrap() {
            WorkerResponse::Report(decoded) => assert_eq!(decoded, report),
            other => panic!("Wrong response type: {:?}", other),
        }
    }

    #[test]
    fn test_messages_are_read_in_order() {
        let mut frames = Vec::new();
        write_message(&mut frames, &WorkerCommand::Ping).unwrap();
        write_message(&mut frames, &WorkerCommand::Shutdown).unwrap();

        let mut input = frames.as_slice();
        assert!(matches!(read_message::<_, WorkerCommand>(&mut input).unwrap(), WorkerCommand::Ping));
        assert!(matches!(
            read_message::<_, WorkerCommand>(&mut input).unwrap(),
            WorkerCommand::Shutdown
        ));
        // Stream exhausted: the worker treats this as parent exit
        assert!(read_message::<_, WorkerCommand>(&mut input).is_err());
    }

    #[test]
    fn test_oversized_length_rejected() {
        let header = u32::MAX.to_le_bytes();
        let err = read_message::<_, WorkerResponse>(&mut header.as_slice()).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }
}
