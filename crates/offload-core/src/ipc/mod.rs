//! Inter-process communication for offload worker processes.
//!
//! This module provides the protocol and utilities for communicating
//! with isolated worker processes that execute tasks.

pub mod protocol;
mod worker;

pub use protocol::{
    TaskSpec, WireError, WorkerCommand, WorkerReport, WorkerResponse, read_message, write_message,
};
pub use worker::{MODULE_PATH_ENV, WORKER_PATH_ENV, WorkerHandle, WorkerKillHandle, WorkerSpawnConfig};
