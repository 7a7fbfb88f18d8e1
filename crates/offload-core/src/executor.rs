//! The execution context object callers hold.
//!
//! Owns the lazily created worker pool, the bundler and the registry of
//! named functions. All entry points into the runtime go through an
//! [`Executor`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::Mutex as TokioMutex;

use crate::bundle::{BundleFormat, BundleOptions, BundleUnit, Bundler, TempEntry};
use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use crate::pool::{PoolStats, WorkerPool};
use crate::registry::{FunctionRegistry, RegisteredFunction};
use crate::task::{ErrorKind, ExecutionResult, Task};

/// Where the code for [`Executor::execute_entry`] comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySource {
    /// An entry module on disk.
    Path(PathBuf),
    /// Module source text, written to a temporary entry file for bundling.
    Inline(String),
}

/// Execution context: worker pool, bundler and function registry.
///
/// The pool is created by the first submission, torn down by
/// [`Executor::shutdown`], and created again by the next submission.
pub struct Executor {
    config: ExecutorConfig,
    bundler: Arc<Bundler>,
    /// Serializes pool construction and teardown.
    init: TokioMutex<()>,
    /// Current pool, readable without waiting for construction.
    pool: RwLock<Option<Arc<WorkerPool>>>,
    registry: RwLock<FunctionRegistry>,
}

impl Executor {
    /// Create an executor. No worker is started until the first submission.
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            bundler: Arc::new(Bundler::new(config.esbuild_path.clone())),
            config,
            init: TokioMutex::new(()),
            pool: RwLock::new(None),
            registry: RwLock::new(FunctionRegistry::new()),
        })
    }

    /// Replace the function registry.
    pub fn with_registry(self, registry: FunctionRegistry) -> Self {
        *self.registry.write().unwrap_or_else(PoisonError::into_inner) = registry;
        self
    }

    /// Create an executor configured from `OFFLOAD_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ExecutorConfig::from_env()?)
    }

    /// Get the configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn current(&self) -> Option<Arc<WorkerPool>> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|pool| !pool.is_closed())
    }

    /// The live pool, constructing it if needed.
    async fn pool(&self) -> Result<Arc<WorkerPool>> {
        if let Some(pool) = self.current() {
            return Ok(pool);
        }

        let _guard = self.init.lock().await;
        // Another submission may have built it while we waited
        if let Some(pool) = self.current() {
            return Ok(pool);
        }

        let pool = Arc::new(WorkerPool::start(self.config.pool.clone()).await?);
        *self.pool.write().unwrap_or_else(PoisonError::into_inner) = Some(pool.clone());
        Ok(pool)
    }

    /// Run a task on the pool.
    pub async fn submit(&self, task: Task) -> Result<ExecutionResult> {
        self.pool().await?.submit(task).await
    }

    /// Run a raw function with injected dependencies.
    ///
    /// With `sync` set the target must return a plain value; otherwise a
    /// returned promise is awaited.
    pub async fn execute_function(
        &self,
        source: impl Into<String>,
        target: impl Into<String>,
        args: Vec<Value>,
        dependencies: Vec<String>,
        sync: bool,
    ) -> Result<ExecutionResult> {
        let task = if sync {
            Task::injected_sync(source, target, args, dependencies)
        } else {
            Task::injected(source, target, args, dependencies)
        };
        self.submit(task).await
    }

    /// Register a named function under `processor` for [`Executor::execute_registered`].
    pub fn register(
        &self,
        processor: impl Into<String>,
        name: impl Into<String>,
        source: impl Into<String>,
        dependencies: Vec<String>,
        sync: bool,
    ) -> Option<RegisteredFunction> {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(processor, name, source, dependencies, sync)
    }

    /// Run a function registered under `processor` with `args`.
    ///
    /// Fails with [`Error::FunctionNotFound`] before touching the pool when
    /// nothing is registered under that name.
    pub async fn execute_registered(
        &self,
        processor: &str,
        name: &str,
        args: Vec<Value>,
    ) -> Result<ExecutionResult> {
        let task = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .task(processor, name, args)?;
        tracing::debug!(processor, function = name, "Running registered function");
        self.submit(task).await
    }

    /// Bundle an entry point without executing it.
    pub async fn bundle(&self, entry: &Path, options: &BundleOptions) -> Result<BundleUnit> {
        let bundler = self.bundler.clone();
        let entry = entry.to_path_buf();
        let options = options.clone();
        tokio::task::spawn_blocking(move || bundler.bundle(&entry, &options))
            .await
            .map_err(|e| Error::Toolchain(format!("Bundler task failed: {}", e)))?
    }

    /// Bundle an entry module and invoke one of its exports.
    ///
    /// A bundle that fails to compile yields a failed result of kind
    /// [`ErrorKind::Compile`]. Missing entry files and a missing esbuild are
    /// configuration errors and come back as `Err`. Inline sources are
    /// written to a temporary entry file that is removed before returning.
    pub async fn execute_entry(
        &self,
        source: EntrySource,
        target: impl Into<String>,
        args: Vec<Value>,
        options: BundleOptions,
    ) -> Result<ExecutionResult> {
        let target = target.into();

        let (_temp, entry) = match source {
            EntrySource::Path(path) => (None, path),
            EntrySource::Inline(code) => {
                let temp = TempEntry::create(&self.config.scratch_dir, &code)?;
                let path = temp.path().to_path_buf();
                (Some(temp), path)
            }
        };

        let mut options = options;
        if options.format != BundleFormat::Cjs {
            // Worker module scopes evaluate CommonJS
            tracing::debug!(format = %options.format, "Bundling as cjs for execution");
            options.format = BundleFormat::Cjs;
        }

        let unit = match self.bundle(&entry, &options).await {
            Ok(unit) => unit,
            Err(Error::Bundle { message, .. }) => {
                let mut result = ExecutionResult::local_failure(
                    ErrorKind::Compile,
                    format!("Bundle failed: {}", message),
                    None,
                );
                result.target_name = Some(target);
                return Ok(result);
            }
            Err(e) => return Err(e),
        };

        if !unit.exports(&target) {
            tracing::warn!(
                function = %target,
                exports = ?unit.exported_names,
                "Target not found by static export scan"
            );
        }

        self.submit(Task::bundle(unit.code, target, args)).await
    }

    /// Pool occupancy. All zeros when no pool exists.
    pub fn stats(&self) -> PoolStats {
        self.current().map(|pool| pool.stats()).unwrap_or_default()
    }

    /// Tear down the pool, if any. The next submission creates a new one.
    pub async fn shutdown(&self) {
        let _guard = self.init.lock().await;
        let pool = self.pool.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(pool) = pool {
            pool.shutdown().await;
        }
    }
}
