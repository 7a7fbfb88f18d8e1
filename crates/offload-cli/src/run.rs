//! Run command: call a function from a source file.

use std::path::Path;

use anyhow::Context;

use crate::PoolArgs;
use crate::output::{parse_args, print_result};

/// Execute `target` from the source in `file`. Returns whether the task succeeded.
pub async fn execute(
    file: &Path,
    target: &str,
    raw_args: &[String],
    deps: Vec<String>,
    sync: bool,
    pool: &PoolArgs,
) -> anyhow::Result<bool> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let args = parse_args(raw_args)?;

    let executor = pool.executor()?;
    let result = executor
        .execute_function(source, target, args, deps, sync)
        .await;
    executor.shutdown().await;

    print_result(&result?)
}
