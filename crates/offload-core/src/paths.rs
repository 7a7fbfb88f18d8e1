//! Scratch directory management.
//!
//! Provides a consistent location for the temporary entry files written
//! when inline source is bundled, shared by the library and the CLI.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Name of the per-project working directory.
pub const OFFLOAD_DIR: &str = ".offload";

/// Directory structure used by offload under a base directory:
///
/// ```text
/// .offload/
/// └── tmp/    # Temporary entry files for inline sources
/// ```
#[derive(Debug, Clone)]
pub struct ScratchDirs {
    /// The `.offload` directory itself.
    pub offload_dir: PathBuf,

    /// Directory holding temporary entry files.
    pub tmp_dir: PathBuf,
}

impl ScratchDirs {
    /// Directory layout rooted at `base`. Nothing is created on disk.
    pub fn under(base: &Path) -> Self {
        let offload_dir = base.join(OFFLOAD_DIR);
        let tmp_dir = offload_dir.join("tmp");
        Self {
            offload_dir,
            tmp_dir,
        }
    }

    /// Layout rooted at the current working directory.
    pub fn current() -> Result<Self> {
        Ok(Self::under(&std::env::current_dir()?))
    }
}
