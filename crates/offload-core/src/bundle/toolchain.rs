//! Toolchain management for bundling.
//!
//! Locates the esbuild CLI and runs it on an entry point.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

/// Environment variable overriding the esbuild binary location.
pub const ESBUILD_PATH_ENV: &str = "OFFLOAD_ESBUILD_PATH";

/// Manages the esbuild binary used by the bundler.
#[derive(Debug, Clone)]
pub struct EsbuildToolchain {
    /// Path to esbuild
    esbuild_path: PathBuf,

    /// Toolchain version string
    version: String,
}

impl EsbuildToolchain {
    /// Create a toolchain manager, detecting esbuild.
    ///
    /// An explicit path wins over the lookup order of [`Self::find_esbuild`].
    pub fn new(explicit: Option<&Path>) -> Result<Self> {
        let esbuild_path = match explicit {
            Some(path) if path.exists() => path.to_path_buf(),
            Some(path) => {
                return Err(Error::Toolchain(format!(
                    "esbuild not found at {}",
                    path.display()
                )));
            }
            None => Self::find_esbuild()?,
        };
        let version = Self::get_version(&esbuild_path)?;

        tracing::debug!(path = %esbuild_path.display(), %version, "Using esbuild");

        Ok(Self {
            esbuild_path,
            version,
        })
    }

    /// Get the esbuild path.
    pub fn esbuild_path(&self) -> &Path {
        &self.esbuild_path
    }

    /// Get the toolchain version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Run esbuild with `args` and return the bundled code from stdout.
    ///
    /// A non-zero exit is a bundle failure for `entry`, carrying esbuild's diagnostics.
    pub fn run(&self, entry: &Path, args: &[String]) -> Result<String> {
        let output = Command::new(&self.esbuild_path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Toolchain(format!("Failed to run esbuild: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("esbuild exited with {}", output.status)
            } else {
                stderr
            };
            return Err(Error::Bundle {
                entry: entry.to_path_buf(),
                message,
            });
        }

        String::from_utf8(output.stdout).map_err(|e| Error::Bundle {
            entry: entry.to_path_buf(),
            message: format!("esbuild produced non UTF-8 output: {}", e),
        })
    }

    /// Find esbuild.
    ///
    /// Looks in the following order:
    /// 1. `OFFLOAD_ESBUILD_PATH` environment variable
    /// 2. `node_modules/.bin/esbuild` under the working directory
    /// 3. System PATH
    pub fn find_esbuild() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(ESBUILD_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(path);
            }
            tracing::warn!(
                "{} points to missing file {}, falling back to lookup",
                ESBUILD_PATH_ENV,
                path.display()
            );
        }

        if let Ok(cwd) = std::env::current_dir() {
            let local = cwd.join("node_modules").join(".bin").join("esbuild");
            if local.exists() {
                return Ok(local);
            }
        }

        which::which("esbuild").map_err(|_| {
            Error::Toolchain(format!(
                "esbuild not found in node_modules/.bin or PATH (set {})",
                ESBUILD_PATH_ENV
            ))
        })
    }

    /// Get esbuild version string.
    fn get_version(esbuild: &Path) -> Result<String> {
        let output = Command::new(esbuild)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Toolchain(format!("Failed to run esbuild: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Toolchain(
                "Failed to get esbuild version".to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_explicit_path() {
        let err = EsbuildToolchain::new(Some(Path::new("/nonexistent/esbuild"))).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.with_hint().contains(ESBUILD_PATH_ENV));
    }

    #[test]
    #[ignore = "Requires esbuild binary"]
    fn test_esbuild_detection() {
        let toolchain = EsbuildToolchain::new(None).expect("Should detect esbuild");
        assert!(!toolchain.version().is_empty());
    }
}
