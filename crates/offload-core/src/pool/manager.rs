//! Bounded pool of worker processes with FIFO dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::ipc::{TaskSpec, WorkerHandle, WorkerKillHandle, WorkerSpawnConfig};
use crate::task::{ExecutionResult, Task};

/// Point-in-time snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Live worker processes, including ones being started.
    pub total_workers: usize,
    /// Workers currently running a task.
    pub busy_workers: usize,
    /// Workers waiting for a task.
    pub idle_workers: usize,
    /// Submissions waiting for a free slot.
    pub pending_tasks: usize,
}

struct IdleWorker {
    handle: WorkerHandle,
    since: Instant,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<IdleWorker>,
    /// Kill handles of busy workers, by pid.
    running: FxHashMap<u32, WorkerKillHandle>,
    total: usize,
    busy: usize,
    pending: usize,
}

/// State shared with dispatch jobs on the blocking pool and the maintenance task.
struct Shared {
    state: Mutex<PoolState>,
    closed: AtomicBool,
    spawn: WorkerSpawnConfig,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, PoolState> {
        // Bookkeeping stays usable even if a holder panicked
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a live idle worker, or reserve a slot and start a new one.
    ///
    /// Idle workers whose process has died are discarded on the way.
    fn checkout(&self) -> Result<WorkerHandle> {
        let mut dead = Vec::new();
        let reused = {
            let mut state = self.state();
            state.busy += 1;
            let mut reused = None;
            while let Some(mut idle) = state.idle.pop() {
                if idle.handle.is_alive() {
                    reused = Some(idle.handle);
                    break;
                }
                state.total -= 1;
                dead.push(idle.handle);
            }
            if reused.is_none() {
                state.total += 1;
            }
            reused
        };

        for worker in dead {
            tracing::warn!(pid = worker.pid(), "Dropping idle worker that exited");
        }
        if let Some(handle) = reused {
            return Ok(handle);
        }

        match WorkerHandle::spawn(&self.spawn) {
            Ok(handle) => {
                tracing::debug!(pid = handle.pid(), "Started worker on demand");
                Ok(handle)
            }
            Err(e) => {
                let mut state = self.state();
                state.total -= 1;
                state.busy -= 1;
                Err(e)
            }
        }
    }

    /// Run `spec` on a worker and return the worker to the idle list if it survived.
    fn dispatch(&self, spec: TaskSpec) -> Result<ExecutionResult> {
        let mut worker = self.checkout()?;
        let pid = worker.pid();
        self.state().running.insert(pid, WorkerKillHandle::new(&worker));

        tracing::debug!(pid, function = %spec.target, mode = ?spec.mode, "Dispatching task");
        let start = Instant::now();
        let outcome = worker.run_task(spec);
        let elapsed = start.elapsed();

        let reusable = outcome.is_ok() && worker.is_alive();
        let retired = {
            let mut state = self.state();
            state.running.remove(&pid);
            state.busy -= 1;
            if reusable && !self.closed.load(Ordering::SeqCst) {
                state.idle.push(IdleWorker {
                    handle: worker,
                    since: Instant::now(),
                });
                None
            } else {
                state.total -= 1;
                Some(worker)
            }
        };

        if let Some(worker) = retired {
            if reusable {
                // Pool closed while the task ran
                let _ = worker.shutdown();
            } else {
                tracing::warn!(pid, "Discarding worker after failed task");
                drop(worker);
            }
        }

        let report = outcome?;
        ExecutionResult::from_report(report, pid, elapsed)
    }

    /// Periodic upkeep: drop idle workers whose process exited, retire workers
    /// idle longer than `idle_timeout`, then start workers until `min_workers`
    /// exist again.
    fn maintain(&self, idle_timeout: Option<Duration>, min_workers: usize) {
        let (dead, expired, missing) = {
            let mut state = self.state();
            let mut dead = Vec::new();
            let mut expired = Vec::new();
            let mut i = 0;
            while i < state.idle.len() {
                if !state.idle[i].handle.is_alive() {
                    dead.push(state.idle.swap_remove(i).handle);
                    state.total -= 1;
                } else if idle_timeout.is_some_and(|t| state.idle[i].since.elapsed() >= t)
                    && state.total > min_workers
                {
                    expired.push(state.idle.swap_remove(i).handle);
                    state.total -= 1;
                } else {
                    i += 1;
                }
            }
            let missing = if self.closed.load(Ordering::SeqCst) {
                0
            } else {
                min_workers.saturating_sub(state.total)
            };
            // Reserve the slots before spawning outside the lock
            state.total += missing;
            (dead, expired, missing)
        };

        for worker in dead {
            tracing::warn!(pid = worker.pid(), "Dropping idle worker that exited");
        }
        for worker in expired {
            tracing::debug!(pid = worker.pid(), tasks = worker.tasks_completed(), "Retiring idle worker");
            let _ = worker.shutdown();
        }

        for _ in 0..missing {
            let spawned = WorkerHandle::spawn(&self.spawn);
            let mut state = self.state();
            match spawned {
                Ok(handle) if !self.closed.load(Ordering::SeqCst) => {
                    tracing::debug!(pid = handle.pid(), "Replenished worker");
                    state.idle.push(IdleWorker {
                        handle,
                        since: Instant::now(),
                    });
                }
                Ok(handle) => {
                    state.total -= 1;
                    drop(state);
                    let _ = handle.shutdown();
                }
                Err(e) => {
                    state.total -= 1;
                    tracing::warn!("Could not replenish worker: {}", e);
                }
            }
        }
    }
}

/// Tracks a submission waiting for a slot. Counted until dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
}

impl<'a> PendingGuard<'a> {
    fn new(shared: &'a Shared) -> Self {
        shared.state().pending += 1;
        Self { shared }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.state().pending -= 1;
    }
}

/// Pool of isolated worker processes.
///
/// At most `max_workers` tasks run at once; further submissions wait in
/// FIFO order. Workers are started lazily on demand and reused.
pub struct WorkerPool {
    config: PoolConfig,
    permits: Arc<Semaphore>,
    shared: Arc<Shared>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool, pre-starting `min_workers` processes.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState::default()),
            closed: AtomicBool::new(false),
            spawn: config.spawn_config(),
        });

        if config.min_workers > 0 {
            let min_workers = config.min_workers;
            let spawn = shared.spawn.clone();
            let workers = tokio::task::spawn_blocking(move || {
                (0..min_workers)
                    .map(|_| WorkerHandle::spawn(&spawn))
                    .collect::<Result<Vec<_>>>()
            })
            .await
            .map_err(|e| Error::Ipc(format!("Worker startup task failed: {}", e)))??;

            let mut state = shared.state();
            state.total = workers.len();
            state.idle = workers
                .into_iter()
                .map(|handle| IdleWorker {
                    handle,
                    since: Instant::now(),
                })
                .collect();
        }

        let maintenance =
            spawn_maintenance(Arc::downgrade(&shared), config.idle_timeout, config.min_workers);

        tracing::info!(
            min_workers = config.min_workers,
            max_workers = config.max_workers,
            "Worker pool started"
        );

        Ok(Self {
            permits: Arc::new(Semaphore::new(config.max_workers)),
            config,
            shared,
            maintenance: Mutex::new(Some(maintenance)),
        })
    }

    /// Configuration the pool was started with.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Run a task on the next free worker.
    ///
    /// Waits (FIFO, no timeout) while every slot is busy. A failing task is a
    /// normal `ExecutionResult`; `Err` is reserved for pool-level problems:
    /// [`Error::PoolClosed`], [`Error::WorkerLost`] or a worker that cannot be started.
    pub async fn submit(&self, task: Task) -> Result<ExecutionResult> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }
        let spec = task.into_spec()?;

        let permit = {
            let _pending = PendingGuard::new(&self.shared);
            self.permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| Error::PoolClosed)?
        };

        // The blocking job owns the permit: if this future is dropped the task
        // still runs to completion and releases its slot.
        let shared = self.shared.clone();
        tokio::task::spawn_blocking(move || {
            let result = shared.dispatch(spec);
            drop(permit);
            result
        })
        .await
        .map_err(|e| Error::Ipc(format!("Dispatch task failed: {}", e)))?
    }

    /// Snapshot of the current occupancy.
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state();
        PoolStats {
            total_workers: state.total,
            busy_workers: state.busy,
            idle_workers: state.idle.len(),
            pending_tasks: state.pending,
        }
    }

    /// Whether [`Self::shutdown`] has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting work and terminate every worker.
    ///
    /// Idle workers are asked to exit; busy workers are killed, which fails
    /// their in-flight submissions with [`Error::WorkerLost`]. Waiting
    /// submissions fail with [`Error::PoolClosed`].
    pub async fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();

        if let Some(task) = self.maintenance.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }

        let (idle, running) = {
            let mut state = self.shared.state();
            let idle: Vec<WorkerHandle> = state.idle.drain(..).map(|w| w.handle).collect();
            state.total -= idle.len();
            let running: Vec<WorkerKillHandle> = state.running.values().cloned().collect();
            (idle, running)
        };

        for handle in &running {
            tracing::debug!(pid = handle.pid(), "Killing busy worker");
            handle.kill();
        }

        let idle_count = idle.len();
        let joined = tokio::task::spawn_blocking(move || {
            for worker in idle {
                let pid = worker.pid();
                if let Err(e) = worker.shutdown() {
                    tracing::warn!(pid, "Worker did not shut down cleanly: {}", e);
                }
            }
        })
        .await;
        if let Err(e) = joined {
            tracing::warn!("Worker shutdown task failed: {}", e);
        }

        tracing::info!(
            idle = idle_count,
            busy = running.len(),
            "Worker pool shut down"
        );
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        if let Some(task) = self.maintenance.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
        // Idle handles kill their processes when dropped
        self.shared.state().idle.clear();
    }
}

/// Upkeep period when no idle timeout is configured.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);

fn spawn_maintenance(
    shared: Weak<Shared>,
    idle_timeout: Option<Duration>,
    min_workers: usize,
) -> JoinHandle<()> {
    let period = idle_timeout
        .map(|timeout| (timeout / 2).max(Duration::from_millis(50)))
        .unwrap_or(MAINTENANCE_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            if shared.closed.load(Ordering::SeqCst) {
                break;
            }
            let done =
                tokio::task::spawn_blocking(move || shared.maintain(idle_timeout, min_workers)).await;
            if let Err(e) = done {
                tracing::warn!("Pool maintenance failed: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn unbootable(min_workers: usize) -> PoolConfig {
        PoolConfig {
            min_workers,
            max_workers: 2,
            worker_binary: Some(PathBuf::from("/nonexistent/offload-worker")),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_lazy_pool_starts_empty() {
        let pool = WorkerPool::start(unbootable(0)).await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats, PoolStats::default());
        assert_eq!(stats, pool.stats());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = PoolConfig {
            min_workers: 3,
            max_workers: 1,
            ..Default::default()
        };
        assert!(matches!(WorkerPool::start(config).await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_prestart_failure_is_reported() {
        let err = WorkerPool::start(unbootable(1)).await.err().unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_spawn_failure_releases_slot() {
        let pool = WorkerPool::start(unbootable(0)).await.unwrap();
        let task = Task::injected("function f() { return 1 }", "f", vec![], vec![]);

        let err = pool.submit(task.clone()).await.unwrap_err();
        assert!(matches!(err, Error::Toolchain(_)));
        assert_eq!(pool.stats(), PoolStats::default());

        // Slot was released: a second submission fails the same way instead of hanging
        assert!(pool.submit(task).await.is_err());
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let pool = WorkerPool::start(unbootable(0)).await.unwrap();
        pool.shutdown().await;
        pool.shutdown().await;

        let task = Task::bundle("module.exports = {}", "f", vec![json!(1)]);
        assert!(matches!(pool.submit(task).await, Err(Error::PoolClosed)));
        assert!(pool.is_closed());
    }

    #[test]
    fn test_pending_guard_accounting() {
        let shared = Shared {
            state: Mutex::new(PoolState::default()),
            closed: AtomicBool::new(false),
            spawn: WorkerSpawnConfig::default(),
        };
        {
            let _a = PendingGuard::new(&shared);
            let _b = PendingGuard::new(&shared);
            assert_eq!(shared.state().pending, 2);
        }
        assert_eq!(shared.state().pending, 0);
    }
}
