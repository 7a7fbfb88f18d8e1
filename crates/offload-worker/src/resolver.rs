//! Dependency resolution and the per-process module cache.
//!
//! Modules are CommonJS files found under the configured search paths. Each
//! one is evaluated at most once per worker process; failures are cached too.

use std::fs;
use std::path::{Path, PathBuf};

use offload_core::bundle::scan_requires;
use rustc_hash::FxHashMap;

/// Modules provided by the engine itself. `fs` is deliberately absent.
pub const BUILTIN_MODULES: &[&str] = &["path", "node:path", "buffer", "node:buffer"];

/// Whether `name` is served by the engine without a filesystem lookup.
pub fn is_builtin(name: &str) -> bool {
    BUILTIN_MODULES.contains(&name)
}

/// Engine side of module loading.
pub trait ModuleHost {
    /// Evaluate `source` as a CommonJS module and register its exports under `key`.
    ///
    /// `requires` maps each `require()` specifier used by the module to the key
    /// of an already registered module.
    fn define_module(
        &mut self,
        key: &str,
        source: &str,
        filename: &Path,
        requires: &[(String, String)],
    ) -> Result<(), String>;
}

/// Cached outcome of resolving one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Evaluated from this file.
    Loaded(PathBuf),
    /// Provided by the engine.
    Builtin,
    /// Could not be located or evaluated.
    Failed(String),
}

/// Resolves dependency names to modules, caching every outcome for the
/// lifetime of the process.
#[derive(Debug, Default)]
pub struct DependencyResolver {
    search_paths: Vec<PathBuf>,
    cache: FxHashMap<String, Resolution>,
}

impl DependencyResolver {
    /// Create a resolver searching `search_paths` in order.
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            cache: FxHashMap::default(),
        }
    }

    /// Directories searched for bare module names.
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Cached outcome for `key`, if it was resolved before.
    pub fn cached(&self, key: &str) -> Option<&Resolution> {
        self.cache.get(key)
    }

    /// Resolve each name, returning whether it loaded.
    ///
    /// A failing name never aborts the batch: it is logged and the engine
    /// binds it to `null`.
    pub fn resolve<H: ModuleHost>(&mut self, host: &mut H, names: &[String]) -> Vec<(String, bool)> {
        let mut in_progress = FxHashMap::default();
        names
            .iter()
            .map(|name| {
                let loaded = match self.resolve_bare(host, name, &mut in_progress) {
                    Resolution::Loaded(_) | Resolution::Builtin => true,
                    Resolution::Failed(reason) => {
                        tracing::warn!("Failed to load dependency: {} ({})", name, reason);
                        false
                    }
                };
                (name.clone(), loaded)
            })
            .collect()
    }

    fn resolve_bare<H: ModuleHost>(
        &mut self,
        host: &mut H,
        name: &str,
        in_progress: &mut FxHashMap<PathBuf, String>,
    ) -> Resolution {
        if is_builtin(name) {
            return Resolution::Builtin;
        }
        if let Some(cached) = self.cache.get(name) {
            return cached.clone();
        }

        let resolution = match self.locate(name) {
            Some(path) => self.load(host, name, &path, in_progress),
            None => Resolution::Failed(format!(
                "Cannot find module '{}' in {:?}",
                name, self.search_paths
            )),
        };
        self.cache.insert(name.to_string(), resolution.clone());
        resolution
    }

    /// Locate a bare module name in the search paths.
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() || is_relative(name) {
            return None;
        }
        self.search_paths
            .iter()
            .find_map(|dir| locate_in(&dir.join(name)))
    }

    /// Evaluate the module at `path` under `key`, loading its own requires first.
    ///
    /// A require leading back into a module that is still loading is bound to
    /// that module's key without loading it again. Such a module is only
    /// registered once its own evaluation finishes, so the require works when
    /// called lazily but throws when it runs at the top level of the cycle.
    fn load<H: ModuleHost>(
        &mut self,
        host: &mut H,
        key: &str,
        path: &Path,
        in_progress: &mut FxHashMap<PathBuf, String>,
    ) -> Resolution {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => return Resolution::Failed(format!("Failed to read {}: {}", path.display(), e)),
        };
        let source = if path.extension().is_some_and(|ext| ext == "json") {
            format!("module.exports = {};", text)
        } else {
            text
        };

        in_progress.insert(path.to_path_buf(), key.to_string());

        let base_dir = path.parent().unwrap_or(Path::new("."));
        let mut requires = Vec::new();
        for spec in scan_requires(&source) {
            if is_builtin(&spec) {
                requires.push((spec.clone(), spec));
                continue;
            }
            let child = if is_relative(&spec) {
                locate_in(&base_dir.join(&spec)).map(|child_path| {
                    let child_key = child_path.display().to_string();
                    (child_key, child_path)
                })
            } else {
                self.locate(&spec).map(|child_path| (spec.clone(), child_path))
            };

            let Some((child_key, child_path)) = child else {
                // The module may guard this require; it throws at runtime if reached
                tracing::debug!(module = key, "Unresolved require '{}'", spec);
                continue;
            };

            if let Some(active) = in_progress.get(&child_path) {
                requires.push((spec, active.clone()));
                continue;
            }
            if !self.cache.contains_key(&child_key) {
                let outcome = self.load(host, &child_key, &child_path, in_progress);
                self.cache.insert(child_key.clone(), outcome);
            }
            requires.push((spec, child_key));
        }

        in_progress.remove(path);

        match host.define_module(key, &source, path, &requires) {
            Ok(()) => {
                tracing::debug!(module = key, path = %path.display(), "Loaded module");
                Resolution::Loaded(path.to_path_buf())
            }
            Err(e) => Resolution::Failed(e),
        }
    }
}

fn is_relative(spec: &str) -> bool {
    spec.starts_with("./") || spec.starts_with("../") || spec.starts_with('/')
}

/// Find the module file for `base`: `<base>`, `<base>.js`, `<base>.cjs`,
/// `<base>.json`, `<base>/package.json` main, `<base>/index.js`.
fn locate_in(base: &Path) -> Option<PathBuf> {
    if base.is_file() {
        return Some(base.to_path_buf());
    }

    for ext in ["js", "cjs", "json"] {
        let mut candidate = base.as_os_str().to_owned();
        candidate.push(".");
        candidate.push(ext);
        let candidate = PathBuf::from(candidate);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    if base.is_dir() {
        if let Some(main) = package_main(base) {
            let main_path = base.join(main);
            if main_path.is_file() {
                return Some(main_path);
            }
            if let Some(found) = locate_in_file_only(&main_path) {
                return Some(found);
            }
        }
        let index = base.join("index.js");
        if index.is_file() {
            return Some(index);
        }
    }

    None
}

/// `main` pointing at `lib/foo` may omit the extension or name a directory.
fn locate_in_file_only(base: &Path) -> Option<PathBuf> {
    ["js", "cjs"]
        .into_iter()
        .map(|ext| base.with_extension(ext))
        .chain(std::iter::once(base.join("index.js")))
        .find(|p| p.is_file())
}

fn package_main(dir: &Path) -> Option<String> {
    let manifest = fs::read_to_string(dir.join("package.json")).ok()?;
    let value: serde_json::Value = serde_json::from_str(&manifest).ok()?;
    value.get("main")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Records definitions instead of evaluating them.
    #[derive(Default)]
    struct RecordingHost {
        defined: Vec<(String, Vec<(String, String)>)>,
        reject: Option<String>,
    }

    impl ModuleHost for RecordingHost {
        fn define_module(
            &mut self,
            key: &str,
            _source: &str,
            _filename: &Path,
            requires: &[(String, String)],
        ) -> Result<(), String> {
            if self.reject.as_deref() == Some(key) {
                return Err(format!("SyntaxError in {}", key));
            }
            self.defined.push((key.to_string(), requires.to_vec()));
            Ok(())
        }
    }

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_resolves_once_per_process() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "math.js", "module.exports = { add: (a, b) => a + b }");

        let mut resolver = DependencyResolver::new(vec![temp.path().to_path_buf()]);
        let mut host = RecordingHost::default();

        let names = vec!["math".to_string()];
        assert_eq!(resolver.resolve(&mut host, &names), vec![("math".to_string(), true)]);
        assert_eq!(resolver.resolve(&mut host, &names), vec![("math".to_string(), true)]);
        assert_eq!(host.defined.len(), 1);
    }

    #[test]
    fn test_failure_does_not_abort_batch() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "present.js", "module.exports = 1");

        let mut resolver = DependencyResolver::new(vec![temp.path().to_path_buf()]);
        let mut host = RecordingHost::default();

        let names = vec!["absent".to_string(), "present".to_string()];
        let outcome = resolver.resolve(&mut host, &names);
        assert_eq!(
            outcome,
            vec![("absent".to_string(), false), ("present".to_string(), true)]
        );
        assert!(matches!(resolver.cached("absent"), Some(Resolution::Failed(_))));
    }

    #[test]
    fn test_evaluation_failure_is_cached() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "broken.js", "module.exports = {");

        let mut resolver = DependencyResolver::new(vec![temp.path().to_path_buf()]);
        let mut host = RecordingHost {
            reject: Some("broken".to_string()),
            ..Default::default()
        };

        let names = vec!["broken".to_string()];
        assert!(!resolver.resolve(&mut host, &names)[0].1);
        host.reject = None;
        // Cached failure: not retried even though the host would now accept it
        assert!(!resolver.resolve(&mut host, &names)[0].1);
        assert!(host.defined.is_empty());
    }

    #[test]
    fn test_cycle_binds_loading_module() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.js", "const b = require('./b');\nmodule.exports = { b };");
        write(temp.path(), "b.js", "module.exports = () => require('./a');");

        let mut resolver = DependencyResolver::new(vec![temp.path().to_path_buf()]);
        let mut host = RecordingHost::default();
        resolver.resolve(&mut host, &["a".to_string()]);

        // a.js is evaluated once, under its bare name
        assert_eq!(host.defined.len(), 2);
        assert!(host.defined[0].0.ends_with("b.js"));
        assert_eq!(host.defined[0].1, vec![("./a".to_string(), "a".to_string())]);
        assert_eq!(host.defined[1].0, "a");
    }

    #[test]
    fn test_builtins_skip_filesystem() {
        let temp = TempDir::new().unwrap();
        // A file shadowing the builtin name is never read
        write(temp.path(), "path.js", "module.exports = 'shadow'");
        write(
            temp.path(),
            "joiner.js",
            "const path = require('node:path');\nmodule.exports = (a, b) => path.join(a, b);",
        );

        let mut resolver = DependencyResolver::new(vec![temp.path().to_path_buf()]);
        let mut host = RecordingHost::default();
        let names = vec!["path".to_string(), "joiner".to_string()];
        let outcome = resolver.resolve(&mut host, &names);

        assert_eq!(
            outcome,
            vec![("path".to_string(), true), ("joiner".to_string(), true)]
        );
        assert_eq!(host.defined.len(), 1);
        assert_eq!(
            host.defined[0],
            (
                "joiner".to_string(),
                vec![("node:path".to_string(), "node:path".to_string())]
            )
        );
        assert!(resolver.cached("path").is_none());
    }

    #[test]
    fn test_package_layouts() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "pkg/package.json", r#"{"main": "lib/entry"}"#);
        write(temp.path(), "pkg/lib/entry.js", "module.exports = 'pkg'");
        write(temp.path(), "dir/index.js", "module.exports = 'dir'");
        write(temp.path(), "legacy.cjs", "module.exports = 'cjs'");

        let resolver = DependencyResolver::new(vec![temp.path().to_path_buf()]);
        assert_eq!(
            resolver.locate("pkg"),
            Some(temp.path().join("pkg/lib/entry.js"))
        );
        assert_eq!(resolver.locate("dir"), Some(temp.path().join("dir/index.js")));
        assert_eq!(resolver.locate("legacy"), Some(temp.path().join("legacy.cjs")));
        assert_eq!(resolver.locate("./legacy"), None);
    }

    #[test]
    fn test_nested_requires_load_first() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "outer/index.js",
            "const h = require('./helper');\nconst inner = require('inner');\nmodule.exports = h + inner;",
        );
        write(temp.path(), "outer/helper.js", "module.exports = 1");
        write(temp.path(), "inner.js", "module.exports = require('outer')");

        let mut resolver = DependencyResolver::new(vec![temp.path().to_path_buf()]);
        let mut host = RecordingHost::default();
        resolver.resolve(&mut host, &["outer".to_string()]);

        let keys: Vec<&str> = host.defined.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys.len(), 3);
        assert!(keys[0].ends_with("helper.js"));
        // The cycle back to `outer` is cut
        assert_eq!(keys[1], "inner");
        assert_eq!(keys[2], "outer");

        let outer_requires = &host.defined[2].1;
        assert_eq!(outer_requires[0].0, "./helper");
        assert_eq!(outer_requires[1], ("inner".to_string(), "inner".to_string()));
    }
}
