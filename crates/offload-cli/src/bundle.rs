//! Bundle command: run esbuild on an entry module.

use std::path::{Path, PathBuf};

use anyhow::Context;
use offload_core::{BundleOptions, Bundler};

use crate::colors;

/// Bundle `entry` and write the code to `output`, or stdout.
pub fn execute(
    entry: &Path,
    options: &BundleOptions,
    output: Option<&Path>,
    esbuild: Option<PathBuf>,
) -> anyhow::Result<()> {
    let bundler = Bundler::new(esbuild);
    let unit = bundler.bundle(entry, options)?;

    match output {
        Some(path) => {
            std::fs::write(path, &unit.code)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "{}Bundled{} {} -> {} ({} bytes, {} format)",
                colors::GREEN,
                colors::RESET,
                entry.display(),
                path.display(),
                unit.size_bytes,
                options.format
            );
        }
        None => {
            print!("{}", unit.code);
            colors::flush_stdout();
        }
    }

    if unit.exported_names.is_empty() {
        eprintln!("{}No exports found{}", colors::DIM, colors::RESET);
    } else {
        eprintln!(
            "{}Exports:{} {}",
            colors::BOLD,
            colors::RESET,
            unit.exported_names.join(", ")
        );
    }

    Ok(())
}
