//! Import specifier resolution.
//!
//! Maps `(specifier, importing module)` to a normalized absolute path,
//! honoring alias prefixes and the configured extension search order.
//!
//! Existence is probed through directory listings rather than `fs::metadata`,
//! so a specifier whose case differs from the on-disk name fails with
//! [`ResolutionError::CaseMismatch`] on every platform, including
//! case-insensitive filesystems that would otherwise resolve it silently.
//!
//! Resolution is a pure function of `(specifier, from, config)`; results are
//! cached and the cache is only ever invalidated by a config change, never by
//! file content changes. Only successful resolutions are cached, so a file
//! created after a failed lookup is found on the next attempt.

use crate::config::ResolveConfig;
use crate::error::ResolutionError;
use rustc_hash::FxHashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

/// Outcome of a listing-based path probe.
enum Probe {
    /// Every component exists with the exact requested case.
    Exists(PathBuf),
    /// A component exists only under a different case.
    CaseMismatch { requested: String, found: String },
    /// Some component does not exist at all.
    Missing,
}

/// Specifier resolver. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct Resolver {
    root: PathBuf,
    extensions: Vec<String>,
    /// Alias prefixes, longest first so `@app` wins over `@`.
    aliases: Vec<(String, PathBuf)>,
    cache: RwLock<FxHashMap<(String, PathBuf), PathBuf>>,
}

impl Resolver {
    #[must_use]
    pub fn new(root: PathBuf, config: &ResolveConfig) -> Self {
        let mut aliases: Vec<(String, PathBuf)> = config
            .aliases
            .iter()
            .map(|(prefix, target)| (prefix.clone(), root.join(target)))
            .collect();
        aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self {
            root,
            extensions: config.extensions.clone(),
            aliases,
            cache: RwLock::new(FxHashMap::default()),
        }
    }

    /// Project root this resolver is anchored at.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `specifier` as imported from the module at `from`.
    pub fn resolve(&self, specifier: &str, from: &Path) -> Result<PathBuf, ResolutionError> {
        let cache_key = (specifier.to_string(), from.to_path_buf());
        if let Some(hit) = self.cache.read().unwrap().get(&cache_key) {
            return Ok(hit.clone());
        }

        let resolved = self.resolve_uncached(specifier, from)?;

        self.cache.write().unwrap().insert(cache_key, resolved.clone());
        Ok(resolved)
    }

    /// Resolve an entry point path (no importing module). Relative paths are
    /// anchored at the project root: the entry resolves as if imported from a
    /// file directly inside the root, so `./index.js` and `src/index.js` both
    /// land under `root`.
    pub fn resolve_entry(&self, entry: &Path) -> Result<PathBuf, ResolutionError> {
        let spec = entry.to_string_lossy().to_string();
        self.resolve(&spec, &self.root.join("__entry__"))
    }

    fn resolve_uncached(&self, specifier: &str, from: &Path) -> Result<PathBuf, ResolutionError> {
        let target = self.target_path(specifier, from);
        let target = normalize(&target);

        let not_found = || ResolutionError::NotFound {
            specifier: specifier.to_string(),
            from: from.to_path_buf(),
        };
        let mismatch = |requested: String, found: String| ResolutionError::CaseMismatch {
            specifier: specifier.to_string(),
            from: from.to_path_buf(),
            requested,
            found,
        };

        // Exact path first.
        match probe(&target) {
            Probe::Exists(path) if path.is_file() => return Ok(path),
            Probe::Exists(dir) if dir.is_dir() => {
                // Directory import: probe for an index file in extension order.
                for ext in &self.extensions {
                    let candidate = dir.join(format!("index{ext}"));
                    match probe(&candidate) {
                        Probe::Exists(path) if path.is_file() => return Ok(path),
                        Probe::CaseMismatch { requested, found } => {
                            return Err(mismatch(requested, found));
                        }
                        _ => {}
                    }
                }
                return Err(not_found());
            }
            Probe::Exists(_) => return Err(not_found()),
            Probe::CaseMismatch { requested, found } => {
                return Err(mismatch(requested, found));
            }
            Probe::Missing => {}
        }

        // No exact match: probe candidate extensions in configured order.
        let target_str = target.as_os_str().to_owned();
        for ext in &self.extensions {
            let mut with_ext = target_str.clone();
            with_ext.push(ext);
            let candidate = PathBuf::from(&with_ext);
            match probe(&candidate) {
                Probe::Exists(path) if path.is_file() => return Ok(path),
                Probe::CaseMismatch { requested, found } => {
                    return Err(mismatch(requested, found));
                }
                _ => {}
            }
        }

        Err(not_found())
    }

    /// Compute the absolute base path for a specifier before probing.
    fn target_path(&self, specifier: &str, from: &Path) -> PathBuf {
        // Alias prefixes rewrite first.
        for (prefix, alias_target) in &self.aliases {
            if specifier == prefix {
                return alias_target.clone();
            }
            if let Some(rest) = specifier.strip_prefix(prefix.as_str()) {
                if let Some(rest) = rest.strip_prefix('/') {
                    return alias_target.join(rest);
                }
            }
        }

        if specifier.starts_with("./") || specifier.starts_with("../") {
            let from_dir = from.parent().unwrap_or(Path::new("."));
            return from_dir.join(specifier);
        }

        if Path::new(specifier).is_absolute() {
            return PathBuf::from(specifier);
        }

        // Bare specifiers are anchored at the project root.
        self.root.join(specifier)
    }

    /// Drop cached resolutions. Only called when configuration changes.
    pub fn clear_cache(&self) {
        self.cache.write().unwrap().clear();
    }

    /// Drop cached resolutions that landed on `path`. Called when a watched
    /// file changes or disappears so the next lookup re-probes the disk.
    pub fn evict(&self, path: &Path) {
        let target = normalize(path);
        self.cache
            .write()
            .unwrap()
            .retain(|_, resolved| *resolved != target);
    }
}

/// Check every path component against its parent's directory listing.
fn probe(path: &Path) -> Probe {
    let mut current = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(name) => {
                let requested = name.to_string_lossy();
                let Ok(entries) = std::fs::read_dir(&current) else {
                    return Probe::Missing;
                };

                let mut case_only: Option<String> = None;
                let mut exact = false;
                for entry in entries.flatten() {
                    let on_disk = entry.file_name();
                    if on_disk == name {
                        exact = true;
                        break;
                    }
                    if on_disk
                        .to_string_lossy()
                        .eq_ignore_ascii_case(&requested)
                    {
                        case_only = Some(on_disk.to_string_lossy().into_owned());
                    }
                }

                if exact {
                    current.push(name);
                } else if let Some(found) = case_only {
                    return Probe::CaseMismatch {
                        requested: requested.into_owned(),
                        found,
                    };
                } else {
                    return Probe::Missing;
                }
            }
            other => current.push(other),
        }
    }

    Probe::Exists(current)
}

/// Lexically normalize a path: drop `.` components and fold `..` into their
/// parent. No filesystem access, no symlink resolution.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolveConfig;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn resolver_for(root: &Path) -> Resolver {
        Resolver::new(root.to_path_buf(), &ResolveConfig::default())
    }

    #[test]
    fn test_resolve_relative_with_extension_probing() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let src = root.join("src");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("index.js"), "import './util';").unwrap();
        std::fs::write(src.join("util.js"), "").unwrap();

        let resolver = resolver_for(&root);
        let resolved = resolver.resolve("./util", &src.join("index.js")).unwrap();
        assert_eq!(resolved, src.join("util.js"));
    }

    #[test]
    fn test_extension_order_prefers_script_over_style() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let src = root.join("src");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("index.js"), "").unwrap();
        std::fs::write(src.join("util.js"), "").unwrap();
        std::fs::write(src.join("util.css"), "").unwrap();

        let resolver = resolver_for(&root);
        let resolved = resolver.resolve("./util", &src.join("index.js")).unwrap();
        assert_eq!(resolved, src.join("util.js"));
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let src = root.join("src");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("index.js"), "").unwrap();
        std::fs::write(src.join("util.js"), "").unwrap();

        let resolver = resolver_for(&root);
        let from = src.join("index.js");
        let first = resolver.resolve("./util", &from).unwrap();
        let second = resolver.resolve("./util", &from).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_directory_index_resolution() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let lib = root.join("src").join("lib");
        std::fs::create_dir_all(&lib).unwrap();
        std::fs::write(root.join("src").join("index.js"), "").unwrap();
        std::fs::write(lib.join("index.js"), "").unwrap();

        let resolver = resolver_for(&root);
        let resolved = resolver
            .resolve("./lib", &root.join("src").join("index.js"))
            .unwrap();
        assert_eq!(resolved, lib.join("index.js"));
    }

    #[test]
    fn test_alias_rewrite() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let src = root.join("src");
        std::fs::create_dir_all(src.join("utils")).unwrap();
        std::fs::write(src.join("utils").join("math.js"), "").unwrap();
        std::fs::write(src.join("index.js"), "").unwrap();

        let mut aliases = BTreeMap::new();
        aliases.insert("@".to_string(), "src".to_string());
        let config = ResolveConfig {
            aliases,
            ..ResolveConfig::default()
        };
        let resolver = Resolver::new(root.clone(), &config);

        let resolved = resolver
            .resolve("@/utils/math", &src.join("index.js"))
            .unwrap();
        assert_eq!(resolved, src.join("utils").join("math.js"));
    }

    #[test]
    fn test_case_mismatch_is_an_error() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let src = root.join("src");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("index.js"), "").unwrap();
        std::fs::write(src.join("Foo.js"), "").unwrap();

        let resolver = resolver_for(&root);
        let err = resolver
            .resolve("./foo.js", &src.join("index.js"))
            .unwrap_err();
        match err {
            ResolutionError::CaseMismatch {
                requested, found, ..
            } => {
                assert_eq!(requested, "foo.js");
                assert_eq!(found, "Foo.js");
            }
            other => panic!("expected CaseMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_entry_with_relative_prefix_anchors_at_root() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let src = root.join("src");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("index.js"), "").unwrap();
        std::fs::write(root.join("index.js"), "").unwrap();

        let resolver = resolver_for(&root);
        // A `./` entry must probe inside the root, not its parent directory.
        assert_eq!(
            resolver.resolve_entry(Path::new("./index.js")).unwrap(),
            root.join("index.js")
        );
        assert_eq!(
            resolver.resolve_entry(Path::new("./src/index.js")).unwrap(),
            src.join("index.js")
        );
        // Bare entries anchor at the root too, with extension probing.
        assert_eq!(
            resolver.resolve_entry(Path::new("src/index")).unwrap(),
            src.join("index.js")
        );
    }

    #[test]
    fn test_not_found() {
        let dir = tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let src = root.join("src");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("index.js"), "").unwrap();

        let resolver = resolver_for(&root);
        let err = resolver
            .resolve("./missing", &src.join("index.js"))
            .unwrap_err();
        assert!(matches!(err, ResolutionError::NotFound { .. }));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(normalize(Path::new("/a/./b")), PathBuf::from("/a/b"));
    }
}
