//! Pool and executor configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::ipc::{MODULE_PATH_ENV, WORKER_PATH_ENV, WorkerSpawnConfig};
use crate::paths::ScratchDirs;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Workers started eagerly when the pool is created and kept alive by pool maintenance.
    pub min_workers: usize,

    /// Upper bound on concurrently running workers.
    pub max_workers: usize,

    /// Explicit path to the `offload-worker` binary.
    /// If None, the binary is located at spawn time.
    pub worker_binary: Option<PathBuf>,

    /// Directories searched for injected dependencies.
    pub module_paths: Vec<PathBuf>,

    /// Retire workers idle for longer than this (never below `min_workers`).
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 4,
            worker_binary: None,
            module_paths: Vec::new(),
            idle_timeout: None,
        }
    }
}

impl PoolConfig {
    /// Check the bounds: `1 <= max_workers` and `min_workers <= max_workers`.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::Config("max_workers must be at least 1".to_string()));
        }
        if self.min_workers > self.max_workers {
            return Err(Error::Config(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.idle_timeout == Some(Duration::ZERO) {
            return Err(Error::Config("idle_timeout must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Worker process settings derived from this configuration.
    pub fn spawn_config(&self) -> WorkerSpawnConfig {
        WorkerSpawnConfig {
            binary: self.worker_binary.clone(),
            module_paths: self.module_paths.clone(),
        }
    }
}

/// Configuration for an [`crate::Executor`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Pool settings, applied whenever the pool is (re)created.
    pub pool: PoolConfig,

    /// Directory for temporary entry files (`.offload/tmp`).
    pub scratch_dir: PathBuf,

    /// Explicit path to the esbuild binary.
    pub esbuild_path: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let scratch_dir = ScratchDirs::current()
            .map(|dirs| dirs.tmp_dir)
            .unwrap_or_else(|_| PathBuf::from(".offload/tmp"));

        Self {
            pool: PoolConfig::default(),
            scratch_dir,
            esbuild_path: None,
        }
    }
}

impl ExecutorConfig {
    /// Build a configuration from `OFFLOAD_*` environment variables on top of the defaults.
    ///
    /// Recognized: `OFFLOAD_MIN_WORKERS`, `OFFLOAD_MAX_WORKERS`,
    /// `OFFLOAD_WORKER_PATH`, `OFFLOAD_MODULE_PATH`, `OFFLOAD_ESBUILD_PATH`,
    /// `OFFLOAD_SCRATCH_DIR`, `OFFLOAD_IDLE_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup("OFFLOAD_MIN_WORKERS") {
            config.pool.min_workers = parse_number("OFFLOAD_MIN_WORKERS", &value)?;
        }
        if let Some(value) = lookup("OFFLOAD_MAX_WORKERS") {
            config.pool.max_workers = parse_number("OFFLOAD_MAX_WORKERS", &value)?;
        }
        if let Some(value) = lookup(WORKER_PATH_ENV) {
            config.pool.worker_binary = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup(MODULE_PATH_ENV) {
            config.pool.module_paths = std::env::split_paths(&value)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        if let Some(value) = lookup("OFFLOAD_IDLE_TIMEOUT_SECS") {
            let secs: u64 = parse_number("OFFLOAD_IDLE_TIMEOUT_SECS", &value)?;
            config.pool.idle_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(value) = lookup("OFFLOAD_ESBUILD_PATH") {
            config.esbuild_path = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("OFFLOAD_SCRATCH_DIR") {
            config.scratch_dir = PathBuf::from(value);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the pool bounds.
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a non-negative integer, got '{}'", key, value)))
}
