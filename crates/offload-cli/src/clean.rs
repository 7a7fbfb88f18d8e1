//! Clean command: remove stale temporary entry files.

use offload_core::ExecutorConfig;

use crate::colors;

/// Sweep the configured scratch directory.
pub fn execute() -> anyhow::Result<()> {
    let config = ExecutorConfig::from_env()?;
    let removed = offload_core::bundle::sweep(&config.scratch_dir)?;

    eprintln!(
        "{}Cleaned{} {} ({} stale entry file{})",
        colors::GREEN,
        colors::RESET,
        config.scratch_dir.display(),
        removed,
        if removed == 1 { "" } else { "s" }
    );
    Ok(())
}
