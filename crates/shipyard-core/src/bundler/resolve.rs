//! Import specifier resolution.
//!
//! Turns an import specifier plus the requesting file into an absolute path.
//!
//! ## Order
//!
//! 1. Aliases, in declaration order. The first alias whose `find` equals the
//!    specifier or is a path prefix of it (`find` + `/`) wins. A trailing `$`
//!    on `find` restricts the alias to exact matches.
//! 2. Relative (`./`, `../`) and absolute specifiers become candidate paths.
//! 3. Bare specifiers walk up `node_modules` directories.
//! 4. Candidates without a recognized extension are probed with each
//!    configured extension, then as a directory `index`.

#![allow(clippy::unused_self)]

use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

use crate::config::AliasConfig;

/// A specifier could not be mapped to an existing file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot resolve '{specifier}' from '{}': {reason}", .from.display())]
pub struct ResolveError {
    pub specifier: String,
    pub from: PathBuf,
    pub reason: String,
}

/// A single alias entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub find: String,
    /// Only the bare `find` itself matches, never `find/...`.
    pub exact: bool,
    pub replacement: String,
}

impl Alias {
    /// Build an alias; a trailing `$` on `find` marks it exact.
    #[must_use]
    pub fn new(find: impl Into<String>, replacement: impl Into<String>) -> Self {
        let find = find.into();
        let (find, exact) = match find.strip_suffix('$') {
            Some(stripped) => (stripped.to_string(), true),
            None => (find, false),
        };
        Self {
            find,
            exact,
            replacement: replacement.into(),
        }
    }

    /// Rewrite `specifier` if this alias matches it.
    #[must_use]
    pub fn apply(&self, specifier: &str) -> Option<String> {
        if specifier == self.find {
            return Some(self.replacement.clone());
        }
        if self.exact {
            return None;
        }
        let rest = if self.find.ends_with('/') {
            specifier.strip_prefix(self.find.as_str())?
        } else {
            specifier
                .strip_prefix(self.find.as_str())?
                .strip_prefix('/')?
        };
        let base = self.replacement.trim_end_matches('/');
        Some(format!("{base}/{rest}"))
    }
}

/// Resolves import specifiers to canonical file paths.
#[derive(Debug)]
pub struct PathResolver {
    root: PathBuf,
    aliases: Vec<Alias>,
    /// Probe order, each with a leading dot.
    extensions: Vec<String>,
    /// Extensions (without dot, lowercase) that suppress probing.
    recognized: FxHashSet<String>,
    cache: RwLock<FxHashMap<(String, PathBuf), PathBuf>>,
}

impl PathResolver {
    /// Create a resolver for a project root.
    ///
    /// Alias replacements starting with `.` are made absolute against `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, aliases: Vec<Alias>, extensions: &[String]) -> Self {
        let root = root.into();
        let aliases = aliases
            .into_iter()
            .map(|mut alias| {
                if alias.replacement.starts_with("./")
                    || alias.replacement.starts_with("../")
                    || alias.replacement == "."
                {
                    alias.replacement = root.join(&alias.replacement).display().to_string();
                }
                alias
            })
            .collect();
        let extensions: Vec<String> = extensions
            .iter()
            .map(|ext| {
                if ext.starts_with('.') {
                    ext.clone()
                } else {
                    format!(".{ext}")
                }
            })
            .collect();
        let recognized = extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Self {
            root,
            aliases,
            extensions,
            recognized,
            cache: RwLock::new(FxHashMap::default()),
        }
    }

    /// Build from configured alias entries.
    #[must_use]
    pub fn from_config(root: &Path, aliases: &[AliasConfig], extensions: &[String]) -> Self {
        let aliases = aliases
            .iter()
            .map(|a| Alias::new(a.find.as_str(), a.replacement.as_str()))
            .collect();
        Self::new(root, aliases, extensions)
    }

    /// Treat these extensions as recognized too (e.g. every loader rule's).
    #[must_use]
    pub fn recognize<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for ext in extensions {
            self.recognized
                .insert(ext.as_ref().trim_start_matches('.').to_ascii_lowercase());
        }
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `specifier` as imported by the file `from`.
    pub fn resolve(&self, specifier: &str, from: &Path) -> Result<PathBuf, ResolveError> {
        let from_dir = from.parent().unwrap_or(&self.root).to_path_buf();
        let cache_key = (specifier.to_string(), from_dir);
        if let Some(cached) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&cache_key)
        {
            return Ok(cached.clone());
        }

        let resolved = self.resolve_uncached(specifier, from)?;

        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cache_key, resolved.clone());

        Ok(resolved)
    }

    /// Resolve the build entry, relative to the project root.
    pub fn resolve_entry(&self, specifier: &str) -> Result<PathBuf, ResolveError> {
        // A virtual importer inside the root makes `./x` root-relative.
        let importer = self.root.join("__entry__");
        self.resolve(specifier, &importer)
    }

    /// Drop every cached resolution.
    pub fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn resolve_uncached(&self, specifier: &str, from: &Path) -> Result<PathBuf, ResolveError> {
        let not_found = |reason: String| ResolveError {
            specifier: specifier.to_string(),
            from: from.to_path_buf(),
            reason,
        };

        if let Some(rewritten) = self.aliases.iter().find_map(|alias| alias.apply(specifier)) {
            tracing::trace!(specifier, rewritten = %rewritten, "alias applied");
            // Aliases are applied once; the rewritten form is never re-aliased.
            return self
                .resolve_unaliased(&rewritten, from)
                .ok_or_else(|| not_found(format!("File not found (aliased to '{rewritten}')")));
        }

        self.resolve_unaliased(specifier, from)
            .ok_or_else(|| not_found(self.failure_reason(specifier)))
    }

    fn resolve_unaliased(&self, specifier: &str, from: &Path) -> Option<PathBuf> {
        if specifier.starts_with("./") || specifier.starts_with("../") {
            let from_dir = from.parent().unwrap_or(&self.root);
            return self.resolve_file_or_directory(&from_dir.join(specifier));
        }

        if Path::new(specifier).is_absolute() {
            return self.resolve_file_or_directory(Path::new(specifier));
        }

        self.resolve_bare(specifier, from)
    }

    fn failure_reason(&self, specifier: &str) -> String {
        if specifier.starts_with("./")
            || specifier.starts_with("../")
            || Path::new(specifier).is_absolute()
        {
            "File not found".to_string()
        } else {
            let (pkg_name, _) = self.parse_bare_specifier(specifier);
            format!("Cannot find package '{pkg_name}' in node_modules")
        }
    }

    /// Resolve a bare specifier by walking up `node_modules` directories.
    fn resolve_bare(&self, specifier: &str, from: &Path) -> Option<PathBuf> {
        let (pkg_name, subpath) = self.parse_bare_specifier(specifier);

        let mut current = from.parent();
        while let Some(dir) = current {
            let pkg_dir = dir.join("node_modules").join(&pkg_name);
            if pkg_dir.is_dir() {
                let found = match &subpath {
                    Some(sub) => self.resolve_file_or_directory(&pkg_dir.join(sub)),
                    None => self.resolve_package_entry(&pkg_dir),
                };
                if found.is_some() {
                    return found;
                }
            }
            current = dir.parent();
        }
        None
    }

    /// Split a bare specifier into package name and subpath.
    fn parse_bare_specifier(&self, specifier: &str) -> (String, Option<String>) {
        let segments = if specifier.starts_with('@') { 3 } else { 2 };
        let parts: Vec<&str> = specifier.splitn(segments, '/').collect();
        if parts.len() == segments {
            let pkg = parts[..segments - 1].join("/");
            (pkg, Some(parts[segments - 1].to_string()))
        } else {
            (specifier.to_string(), None)
        }
    }

    /// Package entry: `module`, then `main`, then `index`.
    fn resolve_package_entry(&self, pkg_dir: &Path) -> Option<PathBuf> {
        let manifest = std::fs::read_to_string(pkg_dir.join("package.json"))
            .ok()
            .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok());

        if let Some(json) = manifest {
            for field in ["module", "main"] {
                if let Some(entry) = json.get(field).and_then(serde_json::Value::as_str) {
                    if let Some(found) = self.resolve_file_or_directory(&pkg_dir.join(entry)) {
                        return Some(found);
                    }
                }
            }
        }

        self.resolve_index(pkg_dir)
    }

    /// Resolve a candidate path that might be a file or a directory.
    fn resolve_file_or_directory(&self, target: &Path) -> Option<PathBuf> {
        if target.is_file() {
            return canonical(target);
        }

        if self.has_recognized_extension(target) {
            return None;
        }

        for ext in &self.extensions {
            let with_ext = PathBuf::from(format!("{}{ext}", target.display()));
            if with_ext.is_file() {
                return canonical(&with_ext);
            }
        }

        if target.is_dir() {
            return self.resolve_index(target);
        }

        None
    }

    fn resolve_index(&self, dir: &Path) -> Option<PathBuf> {
        self.extensions.iter().find_map(|ext| {
            let index = dir.join(format!("index{ext}"));
            if index.is_file() {
                canonical(&index)
            } else {
                None
            }
        })
    }

    fn has_recognized_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.recognized.contains(&ext.to_ascii_lowercase()))
    }
}

fn canonical(path: &Path) -> Option<PathBuf> {
    dunce::canonicalize(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_alias_apply() {
        let alias = Alias::new("@", "/app/src");
        assert_eq!(alias.apply("@"), Some("/app/src".to_string()));
        assert_eq!(alias.apply("@/views/Home"), Some("/app/src/views/Home".to_string()));
        // A scoped package is not an alias hit.
        assert_eq!(alias.apply("@vue/composition-api"), None);

        let exact = Alias::new("vue$", "vue/dist/vue.esm.js");
        assert!(exact.exact);
        assert_eq!(exact.apply("vue"), Some("vue/dist/vue.esm.js".to_string()));
        assert_eq!(exact.apply("vue/types"), None);
    }

    #[test]
    fn test_first_alias_wins() {
        let dir = tempdir().unwrap();
        let x = dir.path().join("x");
        let y = dir.path().join("y");
        touch(&x.join("sub/file.js"));
        touch(&y.join("file.js"));

        let resolver = PathResolver::new(
            dir.path(),
            vec![
                Alias::new("A", x.display().to_string()),
                Alias::new("A/sub", y.display().to_string()),
            ],
            &exts(&[".js"]),
        );
        let resolved = resolver
            .resolve("A/sub/file", &dir.path().join("main.js"))
            .unwrap();
        assert_eq!(
            resolved,
            dunce::canonicalize(x.join("sub/file.js")).unwrap()
        );
    }

    #[test]
    fn test_relative_alias_replacement_is_root_based() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("src/components/Nav.js"));

        let resolver =
            PathResolver::new(dir.path(), vec![Alias::new("@", "./src")], &exts(&[".js"]));
        let resolved = resolver
            .resolve("@/components/Nav", &dir.path().join("deep/nested/file.js"))
            .unwrap();
        assert!(resolved.ends_with("src/components/Nav.js"));
    }

    #[test]
    fn test_extension_probing() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("util.json"));
        let main = dir.path().join("main.js");

        let resolver = PathResolver::new(dir.path(), vec![], &exts(&[".js", ".json"]));
        let resolved = resolver.resolve("./util", &main).unwrap();
        assert!(resolved.ends_with("util.json"));

        let err = resolver.resolve("./missing", &main).unwrap_err();
        assert_eq!(err.specifier, "./missing");
        assert_eq!(err.from, main);
    }

    #[test]
    fn test_probe_order_is_configured_order() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("util.js"));
        touch(&dir.path().join("util.json"));
        let main = dir.path().join("main.js");

        let resolver = PathResolver::new(dir.path(), vec![], &exts(&["json", "js"]));
        assert!(resolver.resolve("./util", &main).unwrap().ends_with("util.json"));
    }

    #[test]
    fn test_recognized_extension_is_not_probed() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("App.vue.js"));
        let main = dir.path().join("main.js");

        let resolver = PathResolver::new(dir.path(), vec![], &exts(&[".js", ".vue"]));
        assert!(resolver.resolve("./App.vue", &main).is_err());

        // Unrecognized dotted names still probe.
        touch(&dir.path().join("jquery.min.js"));
        assert!(resolver
            .resolve("./jquery.min", &main)
            .unwrap()
            .ends_with("jquery.min.js"));
    }

    #[test]
    fn test_directory_index() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("store/index.js"));

        let resolver = PathResolver::new(dir.path(), vec![], &exts(&[".js"]));
        let resolved = resolver.resolve("./store", &dir.path().join("main.js")).unwrap();
        assert!(resolved.ends_with("store/index.js"));
    }

    #[test]
    fn test_bare_package_lookup() {
        let dir = tempdir().unwrap();
        let pkg = dir.path().join("node_modules/vue");
        touch(&pkg.join("dist/vue.runtime.esm.js"));
        touch(&pkg.join("dist/vue.esm.js"));
        fs::write(
            pkg.join("package.json"),
            r#"{ "main": "dist/vue.runtime.common.js", "module": "dist/vue.runtime.esm.js" }"#,
        )
        .unwrap();
        let main = dir.path().join("src/main.js");

        let resolver = PathResolver::new(
            dir.path(),
            vec![Alias::new("vue$", "vue/dist/vue.esm.js")],
            &exts(&[".js"]),
        );
        assert!(resolver.resolve("vue", &main).unwrap().ends_with("dist/vue.esm.js"));

        let plain = PathResolver::new(dir.path(), vec![], &exts(&[".js"]));
        assert!(plain
            .resolve("vue", &main)
            .unwrap()
            .ends_with("dist/vue.runtime.esm.js"));

        let err = plain.resolve("lodash", &main).unwrap_err();
        assert!(err.reason.contains("lodash"));
    }

    #[test]
    fn test_parse_bare_specifier() {
        let resolver = PathResolver::new("/app", vec![], &[]);

        assert_eq!(
            resolver.parse_bare_specifier("lodash"),
            ("lodash".to_string(), None)
        );
        assert_eq!(
            resolver.parse_bare_specifier("lodash/get"),
            ("lodash".to_string(), Some("get".to_string()))
        );
        assert_eq!(
            resolver.parse_bare_specifier("@vue/composition-api"),
            ("@vue/composition-api".to_string(), None)
        );
        assert_eq!(
            resolver.parse_bare_specifier("@babel/core/lib/parse"),
            ("@babel/core".to_string(), Some("lib/parse".to_string()))
        );
    }

    #[test]
    fn test_cache_is_cleared() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("util.json"));
        let main = dir.path().join("main.js");

        let resolver = PathResolver::new(dir.path(), vec![], &exts(&[".js", ".json"]));
        assert!(resolver.resolve("./util", &main).unwrap().ends_with("util.json"));

        touch(&dir.path().join("util.js"));
        assert!(resolver.resolve("./util", &main).unwrap().ends_with("util.json"));

        resolver.clear_cache();
        assert!(resolver.resolve("./util", &main).unwrap().ends_with("util.js"));
    }
}
