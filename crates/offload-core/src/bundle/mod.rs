//! Bundling of arbitrary entry modules into self-contained units.
//!
//! This module provides:
//! - esbuild toolchain detection and invocation
//! - static export and `require` scanning
//! - scoped temporary entry files for inline sources

mod bundler;
mod exports;
mod temp_entry;
mod toolchain;

pub use bundler::{BundleFormat, BundleOptions, BundleUnit, Bundler, Platform};
pub use exports::{scan_exports, scan_requires};
pub use temp_entry::{TempEntry, cleanup, sweep};
pub use toolchain::{ESBUILD_PATH_ENV, EsbuildToolchain};
