//! Worker process runtime for offload.
//!
//! Each worker process embeds one V8 engine (via `deno_core`) and runs tasks
//! sent by the parent over stdin/stdout:
//! - injected-function protocol (async and sync variants)
//! - bundle protocol, evaluating a bundled unit in a fresh module scope
//! - dependency resolution with a per-process module cache

pub mod engine;
pub mod harness;
pub mod resolver;
pub mod runtime;

pub use engine::JsEngine;
pub use resolver::{DependencyResolver, ModuleHost, Resolution};
pub use runtime::WorkerRuntime;
