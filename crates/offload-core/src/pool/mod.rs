//! Worker pool management.
//!
//! Tasks are dispatched to isolated `offload-worker` processes, at most
//! `max_workers` at a time, in submission order.

mod manager;

pub use manager::{PoolStats, WorkerPool};
