//! Named functions grouped by processor.
//!
//! Callers register function source once and later run it by
//! `(processor, name)` instead of shipping the source with every call.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::task::Task;

/// A function stored in a [`FunctionRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredFunction {
    /// Source text declaring the function.
    pub source: String,
    /// Dependencies injected ahead of the call arguments.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Run with the sync protocol: the function must return a plain value.
    #[serde(default)]
    pub sync: bool,
}

/// Processor name to function name to function.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    processors: BTreeMap<String, BTreeMap<String, RegisteredFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` under `processor`, returning the definition it replaces.
    ///
    /// `name` is also the function invoked from `source`, so `source` must
    /// declare a function with that name.
    pub fn register(
        &mut self,
        processor: impl Into<String>,
        name: impl Into<String>,
        source: impl Into<String>,
        dependencies: Vec<String>,
        sync: bool,
    ) -> Option<RegisteredFunction> {
        let function = RegisteredFunction {
            source: source.into(),
            dependencies,
            sync,
        };
        self.processors
            .entry(processor.into())
            .or_default()
            .insert(name.into(), function)
    }

    /// Look up a registered function.
    pub fn get(&self, processor: &str, name: &str) -> Result<&RegisteredFunction> {
        let functions = self.processors.get(processor).ok_or_else(|| Error::FunctionNotFound {
            processor: processor.to_string(),
            name: name.to_string(),
        })?;
        functions.get(name).ok_or_else(|| Error::FunctionNotFound {
            processor: processor.to_string(),
            name: name.to_string(),
        })
    }

    /// Build the task running `processor.name` with `args`.
    pub fn task(&self, processor: &str, name: &str, args: Vec<Value>) -> Result<Task> {
        let function = self.get(processor, name)?;
        let (source, dependencies) = (function.source.clone(), function.dependencies.clone());
        Ok(if function.sync {
            Task::injected_sync(source, name, args, dependencies)
        } else {
            Task::injected(source, name, args, dependencies)
        })
    }

    /// Remove `processor.name`, returning its definition.
    pub fn unregister(&mut self, processor: &str, name: &str) -> Option<RegisteredFunction> {
        let functions = self.processors.get_mut(processor)?;
        let removed = functions.remove(name);
        if functions.is_empty() {
            self.processors.remove(processor);
        }
        removed
    }

    /// Processor names in sorted order.
    pub fn processors(&self) -> impl Iterator<Item = &str> {
        self.processors.keys().map(String::as_str)
    }

    /// Function names registered under `processor`, sorted.
    pub fn functions(&self, processor: &str) -> Vec<&str> {
        self.processors
            .get(processor)
            .map(|functions| functions.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.processors.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}
