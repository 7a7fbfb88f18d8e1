//! Core runtime for offloading JavaScript functions to isolated worker processes.
//!
//! This crate provides:
//! - Worker process pool with FIFO dispatch and background maintenance
//! - Length-prefixed rkyv IPC with `offload-worker` processes
//! - Entry point bundling through esbuild with static export discovery
//! - Task and result types, including memory telemetry
//! - A registry of named functions grouped by processor
//! - The [`Executor`] context object tying these together

pub mod bundle;
pub mod config;
pub mod error;
pub mod executor;
pub mod ipc;
pub mod paths;
pub mod pool;
pub mod registry;
pub mod task;
pub mod telemetry;

pub use bundle::{BundleFormat, BundleOptions, BundleUnit, Bundler, Platform, TempEntry};
pub use config::{ExecutorConfig, PoolConfig};
pub use error::{Error, Result};
pub use executor::{EntrySource, Executor};
pub use paths::ScratchDirs;
pub use pool::{PoolStats, WorkerPool};
pub use registry::{FunctionRegistry, RegisteredFunction};
pub use task::{ErrorKind, ExecutionResult, Task, TaskMode};
pub use telemetry::MemorySnapshot;
