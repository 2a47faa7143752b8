//! Source file enumeration.
//!
//! Honors `.gitignore`/`.ignore` files (without requiring a git repo), the
//! configured exclude list, and only yields files whose extension maps to
//! a supported [`Language`]. Paths are returned relative to the root with
//! `/` separators, sorted, so the same tree always yields the same order.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::schema::IndexConfig;
use crate::error::{CodeTraceError, Result};
use crate::indexer::parser::CodeParser;
use crate::types::Language;

/// One source file found under the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Root-relative path with `/` separators.
    pub path: String,
    pub abs_path: PathBuf,
    pub language: Language,
    pub size: u64,
}

/// Collect every indexable source file under `root`.
pub fn walk_sources(root: &Path, config: &IndexConfig) -> Result<Vec<SourceFile>> {
    if !root.is_dir() {
        return Err(CodeTraceError::NotFound(format!("project root {}", root.display())));
    }

    let walker = ignore::WalkBuilder::new(root)
        .standard_filters(true)
        .require_git(false)
        .build();

    let mut files = Vec::new();
    for result in walker {
        let entry = match result {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "walk error");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let Some(path) = relative_path(root, entry.path()) else {
            continue;
        };
        if is_excluded(&path, &config.exclude) {
            continue;
        }
        let Some(language) = CodeParser::detect_language(&path) else {
            continue;
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push(SourceFile {
            path,
            abs_path: entry.path().to_path_buf(),
            language,
            size,
        });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(root = %root.display(), files = files.len(), "walked source tree");
    Ok(files)
}

/// `path` relative to `root` with `/` separators.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// A pattern without `/` matches a whole path component; one with `/`
/// matches as a substring of the relative path.
pub fn is_excluded(path: &str, exclude: &[String]) -> bool {
    exclude.iter().any(|pattern| {
        if pattern.contains('/') {
            path.contains(pattern.trim_matches('/'))
        } else {
            path.split('/').any(|part| part == pattern)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn touch(root: &Path, rel: &str, body: &str) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, body).unwrap();
    }

    #[test]
    fn finds_supported_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "src/b.ts", "export const b = 1;\n");
        touch(dir.path(), "src/a.py", "x = 1\n");
        touch(dir.path(), "README.md", "# readme\n");
        touch(dir.path(), "node_modules/pkg/index.js", "module.exports = 1;\n");

        let files = walk_sources(dir.path(), &IndexConfig::default()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.py", "src/b.ts"]);
        assert_eq!(files[0].language, Language::Python);
    }

    #[test]
    fn gitignore_is_honored_without_git() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ".gitignore", "generated/\n");
        touch(dir.path(), "generated/out.js", "var x;\n");
        touch(dir.path(), "main.go", "package main\n");
        let files = walk_sources(dir.path(), &IndexConfig::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "main.go");
    }

    #[test]
    fn missing_root_is_an_error() {
        let err = walk_sources(Path::new("/definitely/not/here"), &IndexConfig::default()).unwrap_err();
        assert!(matches!(err, CodeTraceError::NotFound(_)));
    }

    #[test_case("src/vendor/x.ts", "vendor", true ; "component")]
    #[test_case("src/vendors/x.ts", "vendor", false ; "component prefix")]
    #[test_case("src/gen/api/x.ts", "gen/api", true ; "substring")]
    #[test_case("src/a.ts", ".git", false ; "no match")]
    fn exclusion(path: &str, pattern: &str, expected: bool) {
        assert_eq!(is_excluded(path, &[pattern.to_string()]), expected);
    }
}
