//! Exec command: bundle an entry module and call one of its exports.

use offload_core::{BundleOptions, EntrySource};

use crate::PoolArgs;
use crate::output::{parse_args, print_result};

/// Bundle `source` with `options` and invoke `target`. Returns whether the task succeeded.
pub async fn execute(
    source: EntrySource,
    target: &str,
    raw_args: &[String],
    options: BundleOptions,
    pool: &PoolArgs,
) -> anyhow::Result<bool> {
    let args = parse_args(raw_args)?;

    let executor = pool.executor()?;
    let result = executor.execute_entry(source, target, args, options).await;
    executor.shutdown().await;

    print_result(&result?)
}
