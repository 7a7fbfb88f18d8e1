//! Embedded V8 engine.

use std::path::Path;

use anyhow::{Context, Result};
use deno_core::{JsRuntime, PollEventLoopOptions, RuntimeOptions, v8};

use crate::harness::{self, BOOTSTRAP};
use crate::resolver::ModuleHost;

/// One V8 isolate with the offload runtime installed.
///
/// Not `Send`: lives on the worker's single thread for the whole process.
pub struct JsEngine {
    runtime: JsRuntime,
}

impl JsEngine {
    /// Create an engine and install the bootstrap runtime.
    pub fn new() -> Result<Self> {
        let mut runtime = JsRuntime::new(RuntimeOptions::default());

        let cwd = std::env::current_dir().unwrap_or_else(|_| Path::new("/").to_path_buf());
        runtime
            .execute_script("<offload:host>", harness::host_prelude(&cwd))
            .map_err(|e| anyhow::anyhow!("{}", e))
            .context("Failed to install host prelude")?;
        runtime
            .execute_script("<offload:bootstrap>", BOOTSTRAP.to_string())
            .map_err(|e| anyhow::anyhow!("{}", e))
            .context("Failed to install bootstrap runtime")?;

        Ok(Self { runtime })
    }

    /// Evaluate `script`, drive the event loop until its value settles, and
    /// return the value as a string.
    pub async fn eval_to_string(&mut self, script: String) -> Result<String, String> {
        let value = self
            .runtime
            .execute_script("<offload:task>", script)
            .map_err(|e| e.to_string())?;

        let resolve = self.runtime.resolve(value);
        let resolved = self
            .runtime
            .with_event_loop_promise(resolve, PollEventLoopOptions::default())
            .await
            .map_err(|e| e.to_string())?;

        let scope = &mut self.runtime.handle_scope();
        let local = v8::Local::new(scope, resolved);
        let string = local
            .to_string(scope)
            .ok_or_else(|| "Result could not be converted to a string".to_string())?;
        Ok(string.to_rust_string_lossy(scope))
    }
}

impl ModuleHost for JsEngine {
    fn define_module(
        &mut self,
        key: &str,
        source: &str,
        filename: &Path,
        requires: &[(String, String)],
    ) -> Result<(), String> {
        let script = harness::define_call(key, source, filename, requires);
        self.runtime
            .execute_script("<offload:define>", script)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
