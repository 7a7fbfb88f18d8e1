//! Entry point bundling via esbuild.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::exports::scan_exports;
use super::toolchain::EsbuildToolchain;

/// Output module format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleFormat {
    /// CommonJS, the format worker module scopes evaluate.
    #[default]
    Cjs,
    /// ECMAScript modules.
    Esm,
}

/// Target platform for resolution of built-ins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Node,
    Browser,
}

impl BundleFormat {
    fn as_str(self) -> &'static str {
        match self {
            Self::Cjs => "cjs",
            Self::Esm => "esm",
        }
    }
}

impl Platform {
    fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Browser => "browser",
        }
    }
}

impl fmt::Display for BundleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BundleFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cjs" | "commonjs" => Ok(Self::Cjs),
            "esm" => Ok(Self::Esm),
            other => Err(format!("unknown bundle format '{}' (expected cjs or esm)", other)),
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "node" => Ok(Self::Node),
            "browser" => Ok(Self::Browser),
            other => Err(format!("unknown platform '{}' (expected node or browser)", other)),
        }
    }
}

/// Options for a bundle run. Tree-shaking is always on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleOptions {
    #[serde(default)]
    pub format: BundleFormat,
    #[serde(default)]
    pub platform: Platform,
    /// Modules left as runtime `require`/`import` calls.
    #[serde(default)]
    pub external: Vec<String>,
    #[serde(default)]
    pub minify: bool,
}

impl BundleOptions {
    /// esbuild command line for `entry`.
    fn esbuild_args(&self, entry: &Path) -> Vec<String> {
        let mut args = vec![
            entry.display().to_string(),
            "--bundle".to_string(),
            format!("--format={}", self.format),
            format!("--platform={}", self.platform),
            "--tree-shaking=true".to_string(),
            "--charset=utf8".to_string(),
            "--log-level=error".to_string(),
        ];
        if self.minify {
            args.push("--minify".to_string());
        }
        args.extend(self.external.iter().map(|name| format!("--external:{}", name)));
        args
    }
}

/// A self-contained compiled code unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleUnit {
    /// Bundled code.
    pub code: String,
    /// Statically detected top-level export names, unique, first-seen order.
    pub exported_names: Vec<String>,
    /// Byte length of `code`.
    pub size_bytes: u64,
}

impl BundleUnit {
    /// Wrap already bundled code, scanning it for exports.
    pub fn from_code(code: String) -> Self {
        let exported_names = scan_exports(&code);
        let size_bytes = code.len() as u64;
        Self {
            code,
            exported_names,
            size_bytes,
        }
    }

    /// Whether the static scan found `name`.
    pub fn exports(&self, name: &str) -> bool {
        self.exported_names.iter().any(|n| n == name)
    }
}

/// Compiles entry points into [`BundleUnit`]s.
///
/// The esbuild binary is located on first use.
#[derive(Debug, Default)]
pub struct Bundler {
    esbuild_path: Option<PathBuf>,
    toolchain: OnceLock<EsbuildToolchain>,
}

impl Bundler {
    /// Create a bundler, optionally pinned to an esbuild binary.
    pub fn new(esbuild_path: Option<PathBuf>) -> Self {
        Self {
            esbuild_path,
            toolchain: OnceLock::new(),
        }
    }

    fn toolchain(&self) -> Result<&EsbuildToolchain> {
        if let Some(toolchain) = self.toolchain.get() {
            return Ok(toolchain);
        }
        let detected = EsbuildToolchain::new(self.esbuild_path.as_deref())?;
        Ok(self.toolchain.get_or_init(|| detected))
    }

    /// Bundle `entry` and everything it imports into one unit.
    ///
    /// # Errors
    /// - [`Error::EntryNotFound`] when `entry` is not a file
    /// - [`Error::Toolchain`] when esbuild cannot be found or run
    /// - [`Error::Bundle`] when esbuild rejects the input
    pub fn bundle(&self, entry: &Path, options: &BundleOptions) -> Result<BundleUnit> {
        if !entry.is_file() {
            return Err(Error::EntryNotFound(entry.to_path_buf()));
        }

        let toolchain = self.toolchain()?;
        let code = toolchain.run(entry, &options.esbuild_args(entry))?;

        if code.trim().is_empty() {
            return Err(Error::Bundle {
                entry: entry.to_path_buf(),
                message: "No output generated".to_string(),
            });
        }

        let unit = BundleUnit::from_code(code);
        tracing::debug!(
            entry = %entry.display(),
            size = unit.size_bytes,
            exports = ?unit.exported_names,
            "Bundled entry point"
        );

        Ok(unit)
    }
}
