//! The three invocation protocols run by a worker.

use std::path::PathBuf;

use anyhow::Result;
use offload_core::bundle::scan_requires;
use offload_core::ipc::{MODULE_PATH_ENV, TaskSpec, WorkerReport};
use offload_core::{ErrorKind, MemorySnapshot, TaskMode};

use crate::engine::JsEngine;
use crate::harness::{self, Outcome};
use crate::resolver::DependencyResolver;

/// Filename bundles are evaluated under.
const BUNDLE_FILENAME: &str = "bundle.js";

/// Engine plus dependency cache for one worker process.
pub struct WorkerRuntime {
    engine: JsEngine,
    resolver: DependencyResolver,
}

impl WorkerRuntime {
    /// Create a runtime searching `module_paths` for dependencies.
    pub fn new(module_paths: Vec<PathBuf>) -> Result<Self> {
        Ok(Self {
            engine: JsEngine::new()?,
            resolver: DependencyResolver::new(module_paths),
        })
    }

    /// Create a runtime using the search path in `OFFLOAD_MODULE_PATH`.
    pub fn from_env() -> Result<Self> {
        let module_paths = std::env::var_os(MODULE_PATH_ENV)
            .map(|value| {
                std::env::split_paths(&value)
                    .filter(|p| !p.as_os_str().is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self::new(module_paths)
    }

    /// Dependency resolver of this runtime.
    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    /// Run a task received over IPC.
    pub async fn run(&mut self, task: TaskSpec) -> WorkerReport {
        match task.mode {
            TaskMode::InjectedFunction => {
                self.execute(&task.source, &task.target, &task.args_json, &task.dependencies)
                    .await
            }
            TaskMode::InjectedFunctionSync => {
                self.execute_sync(&task.source, &task.target, &task.args_json, &task.dependencies)
                    .await
            }
            TaskMode::Bundle => {
                self.execute_bundle(&task.source, &task.target, &task.args_json)
                    .await
            }
        }
    }

    /// Run `target` from `source` with injected dependencies, awaiting a deferred result.
    pub async fn execute(
        &mut self,
        source: &str,
        target: &str,
        args_json: &str,
        dependencies: &[String],
    ) -> WorkerReport {
        self.run_injected(source, target, args_json, dependencies, true)
            .await
    }

    /// Run `target` from `source` with injected dependencies; the result must be immediate.
    pub async fn execute_sync(
        &mut self,
        source: &str,
        target: &str,
        args_json: &str,
        dependencies: &[String],
    ) -> WorkerReport {
        self.run_injected(source, target, args_json, dependencies, false)
            .await
    }

    async fn run_injected(
        &mut self,
        source: &str,
        target: &str,
        args_json: &str,
        dependencies: &[String],
        is_async: bool,
    ) -> WorkerReport {
        if !harness::is_identifier(target) {
            let outcome = Outcome::failed(
                ErrorKind::Compile,
                format!("Invalid function name '{}'", target),
            );
            return report(outcome, None, None, None);
        }

        self.resolver.resolve(&mut self.engine, dependencies);

        let params = harness::parameter_names(dependencies);
        let script = harness::injected_call(source, target, args_json, &params, dependencies, is_async);
        let outcome = self.evaluate(script).await;

        let loaded = matches!(outcome, Outcome::Value(_)).then(|| dependencies.to_vec());
        report(outcome, loaded, None, None)
    }

    /// Evaluate a bundled unit in a fresh module scope and invoke its `target` export.
    pub async fn execute_bundle(&mut self, code: &str, target: &str, args_json: &str) -> WorkerReport {
        let externals: Vec<String> = scan_requires(code)
            .into_iter()
            .filter(|name| !name.starts_with('.') && !name.starts_with('/'))
            .collect();
        if !externals.is_empty() {
            self.resolver.resolve(&mut self.engine, &externals);
        }

        let script = harness::bundle_call(code, target, args_json, BUNDLE_FILENAME);
        let outcome = self.evaluate(script).await;

        report(
            outcome,
            None,
            Some(code.len() as u64),
            Some(target.to_string()),
        )
    }

    async fn evaluate(&mut self, script: String) -> Outcome {
        match self.engine.eval_to_string(script).await {
            Ok(text) => harness::decode(&text),
            // Errors escaping the protocol functions, e.g. an unhandled rejection
            Err(message) => Outcome::failed(ErrorKind::Runtime, message),
        }
    }
}

fn report(
    outcome: Outcome,
    dependencies_loaded: Option<Vec<String>>,
    bundle_size_bytes: Option<u64>,
    target_name: Option<String>,
) -> WorkerReport {
    let (success, value_json, error) = match outcome {
        Outcome::Value(json) => (true, Some(json), None),
        Outcome::Failed(err) => (false, None, Some(err)),
    };

    WorkerReport {
        success,
        value_json,
        error,
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
        memory: MemorySnapshot::capture(),
        dependencies_loaded,
        bundle_size_bytes,
        target_name,
    }
}
