//! Scoped temporary entry files for inline sources.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

const ENTRY_PREFIX: &str = "entry_";

/// A temporary entry file, removed when the guard is dropped.
///
/// Created for inline source that has to go through the bundler. Dropping
/// the guard on every exit path (success, bundle failure, execution failure)
/// leaves the scratch directory clean.
#[derive(Debug)]
pub struct TempEntry {
    path: PathBuf,
}

impl TempEntry {
    /// Write `code` to `entry_<millis>_<random>.js` under `dir`, creating `dir` if absent.
    pub fn create(dir: &Path, code: &str) -> Result<Self> {
        Self::create_with(dir, |path| fs::write(path, code))
    }

    fn create_with(dir: &Path, write: impl FnOnce(&Path) -> std::io::Result<()>) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let millis = chrono::Utc::now().timestamp_millis();
        let random = uuid::Uuid::new_v4().simple().to_string();
        let entry = Self {
            path: dir.join(format!("{}{}_{}.js", ENTRY_PREFIX, millis, &random[..9])),
        };

        // A failed write drops the guard, removing any partial file
        write(&entry.path)?;
        tracing::trace!(path = %entry.path.display(), "Created temporary entry file");

        Ok(entry)
    }

    /// Path of the entry file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempEntry {
    fn drop(&mut self) {
        cleanup(&self.path);
    }
}

/// Remove a temporary entry file if present.
///
/// Failures are logged, never propagated.
pub fn cleanup(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::trace!(path = %path.display(), "Removed temporary entry file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to cleanup temp file {}: {}", path.display(), e),
    }
}

/// Remove entry files left in `dir` by processes that never dropped their guard.
///
/// Other files are left alone. Returns the number of files removed; a
/// missing `dir` counts as empty.
pub fn sweep(dir: &Path) -> Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        let is_entry = path.is_file()
            && path.extension().is_some_and(|ext| ext == "js")
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(ENTRY_PREFIX));
        if is_entry {
            fs::remove_file(&path)?;
            tracing::debug!(path = %path.display(), "Removed stale entry file");
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_writes_named_file() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("nested").join("tmp");

        let entry = TempEntry::create(&dir, "module.exports = { f: () => 1 }").unwrap();
        let name = entry.path().file_name().unwrap().to_string_lossy().to_string();

        assert!(name.starts_with("entry_"));
        assert!(name.ends_with(".js"));
        assert_eq!(name.split('_').count(), 3);
        assert_eq!(
            fs::read_to_string(entry.path()).unwrap(),
            "module.exports = { f: () => 1 }"
        );
    }

    #[test]
    fn test_drop_removes_file() {
        let temp = TempDir::new().unwrap();
        let path = {
            let entry = TempEntry::create(temp.path(), "1").unwrap();
            entry.path().to_path_buf()
        };
        assert!(!path.exists());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_entries_are_unique() {
        let temp = TempDir::new().unwrap();
        let a = TempEntry::create(temp.path(), "a").unwrap();
        let b = TempEntry::create(temp.path(), "b").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_cleanup_missing_file_is_silent() {
        let temp = TempDir::new().unwrap();
        cleanup(&temp.path().join("entry_0_missing.js"));
    }

    #[test]
    fn test_failed_write_leaves_no_file() {
        let temp = TempDir::new().unwrap();

        let result = TempEntry::create_with(temp.path(), |path| {
            fs::write(path, "module.exports = { f")?;
            Err(std::io::Error::other("disk full"))
        });

        assert!(result.is_err());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_sweep_removes_only_entry_files() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("entry_1_abcdef012.js"), "1").unwrap();
        fs::write(temp.path().join("entry_2_abcdef012.js"), "2").unwrap();
        fs::write(temp.path().join("notes.js"), "keep").unwrap();
        fs::write(temp.path().join("entry_3.txt"), "keep").unwrap();

        assert_eq!(sweep(temp.path()).unwrap(), 2);
        let mut left: Vec<String> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        left.sort();
        assert_eq!(left, vec!["entry_3.txt", "notes.js"]);

        assert_eq!(sweep(&temp.path().join("absent")).unwrap(), 0);
    }
}
