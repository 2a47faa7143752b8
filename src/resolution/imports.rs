//! Cross-file import path resolution.
//!
//! Resolves import specifiers (e.g. `./utils`, `../helpers/auth`, `.models`,
//! `crate::store`) to indexed file paths, then links each import symbol to
//! the symbols it brings in.
//!
//! # Strategy
//!
//! 1. Relative specifiers (`./`, `../`) are joined onto the importing file's
//!    directory and probed with common extensions and index files.
//! 2. Python dotted modules are resolved relative to the package for
//!    leading dots, otherwise from the repository root and the importing
//!    file's directory.
//! 3. Rust `crate::`/`super::`/`self::` paths map onto `src/` module files.
//! 4. Quoted C/C++ includes are tried next to the includer, then from the
//!    root.
//! 5. Named imports link to the named symbols in the target file;
//!    wildcard, default, and module imports link to the target's module
//!    symbol.
//!
//! Package imports that do not map to an indexed file produce no edge.

use std::collections::{HashMap, HashSet};
use std::path::{Component, PathBuf};

use crate::types::{module_symbol_id, Edge, EdgeKind, EdgeOrigin, ImportRef, Language, Symbol, SymbolKind};

/// Extension patterns to try when resolving import specifiers.
/// Ordered by likelihood for each language ecosystem.
const EXTENSION_PATTERNS: &[&str] = &[
    "",           // exact match (specifier already has extension)
    ".ts",        // TypeScript
    ".tsx",       // TypeScript JSX
    ".js",        // JavaScript
    ".jsx",       // JavaScript JSX
    ".mjs",       // ES Module JS
    ".cjs",       // CommonJS
    ".d.ts",      // declaration files
    "/index.ts",  // TypeScript barrel
    "/index.tsx", // TypeScript JSX barrel
    "/index.js",  // JavaScript barrel
    "/index.jsx", // JavaScript JSX barrel
    ".py",        // Python
    "/__init__.py",
    ".rs",
    "/mod.rs",
    ".go",
    ".java",
    ".cs",
    ".h",
    ".hpp",
];

const PYTHON_PATTERNS: &[&str] = &[".py", "/__init__.py"];

const RUST_PATTERNS: &[&str] = &[".rs", "/mod.rs"];

/// An import reference together with the file it resolved to, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImport {
    pub import: ImportRef,
    pub target_file: Option<String>,
}

/// Resolve every import reference against the indexed file set.
pub fn resolve_import_refs(
    refs: &[ImportRef],
    languages: &HashMap<String, Language>,
    indexed_files: &HashSet<String>,
) -> Vec<ResolvedImport> {
    refs.iter()
        .map(|r| {
            let language = languages.get(&r.file_path).copied();
            ResolvedImport {
                target_file: language.and_then(|lang| {
                    resolve_specifier(&r.file_path, &r.specifier, lang, indexed_files)
                }),
                import: r.clone(),
            }
        })
        .collect()
}

/// Build `import` edges from import symbols to the symbols they bring in.
pub fn link_imports(
    resolved: &[ResolvedImport],
    nodes_by_file: &HashMap<String, Vec<Symbol>>,
    indexed_files: &HashSet<String>,
    languages: &HashMap<String, Language>,
) -> Vec<Edge> {
    let mut edges = Vec::new();

    for r in resolved {
        let Some(target_file) = r.target_file.as_deref() else {
            continue;
        };
        let import = &r.import;
        let edge_to = |target: &str, key: &str| {
            Edge::resolved(
                EdgeKind::Import,
                &import.symbol_id,
                target,
                Some(key),
                &import.file_path,
                import.line,
                1.0,
                EdgeOrigin::Static,
            )
        };

        if import.names.is_empty() {
            edges.push(edge_to(&module_symbol_id(target_file), &import.specifier));
            continue;
        }

        let target_nodes = nodes_by_file.get(target_file);
        for name in &import.names {
            let named = target_nodes.and_then(|nodes| {
                nodes
                    .iter()
                    .filter(|n| n.name == *name && !matches!(n.kind, SymbolKind::Import | SymbolKind::Module))
                    .max_by_key(|n| (n.exported, std::cmp::Reverse(n.start_line)))
            });
            if let Some(target) = named {
                edges.push(edge_to(&target.id, name));
                continue;
            }

            // `from pkg import submodule` names a module rather than a symbol.
            let language = languages.get(&import.file_path).copied();
            let sub_spec = match language {
                Some(Language::Python) => format!("{}.{}", import.specifier.trim_end_matches('.'), name),
                Some(Language::Rust) => format!("{}::{}", import.specifier, name),
                _ => String::new(),
            };
            let sub_file = language.filter(|_| !sub_spec.is_empty()).and_then(|lang| {
                resolve_specifier(&import.file_path, &sub_spec, lang, indexed_files)
            });
            let fallback = sub_file.unwrap_or_else(|| target_file.to_string());
            edges.push(edge_to(&module_symbol_id(&fallback), name));
        }
    }

    edges
}

// ---------------------------------------------------------------------------
// ImportIndex
// ---------------------------------------------------------------------------

/// Which files a given file imports, keyed by the names it imports.
#[derive(Debug, Default, Clone)]
pub struct ImportIndex {
    named: HashMap<String, HashMap<String, HashSet<String>>>,
    whole: HashMap<String, HashSet<String>>,
}

impl ImportIndex {
    pub fn build(resolved: &[ResolvedImport]) -> Self {
        let mut index = Self::default();
        for r in resolved {
            let Some(target) = &r.target_file else { continue };
            let file = r.import.file_path.clone();
            if r.import.names.is_empty() {
                index.whole.entry(file).or_default().insert(target.clone());
            } else {
                let by_name = index.named.entry(file).or_default();
                for name in &r.import.names {
                    by_name.entry(name.clone()).or_default().insert(target.clone());
                }
            }
        }
        index
    }

    /// Files that `file` imports `name` from explicitly, or imports whole.
    pub fn files_providing(&self, file: &str, name: &str) -> HashSet<&str> {
        let mut out: HashSet<&str> = HashSet::new();
        if let Some(targets) = self.named.get(file).and_then(|m| m.get(name)) {
            out.extend(targets.iter().map(String::as_str));
        }
        if let Some(targets) = self.whole.get(file) {
            out.extend(targets.iter().map(String::as_str));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Specifier resolution
// ---------------------------------------------------------------------------

/// Check if an import specifier is a relative path.
fn is_relative_import(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../")
}

/// Resolve an import specifier to an indexed file path.
pub fn resolve_specifier(
    importing_file: &str,
    specifier: &str,
    language: Language,
    indexed_files: &HashSet<String>,
) -> Option<String> {
    let importing_dir = parent_dir(importing_file);

    if is_relative_import(specifier) {
        return probe(&join(importing_dir, specifier), EXTENSION_PATTERNS, indexed_files);
    }

    match language {
        Language::Python => resolve_python(importing_dir, specifier, indexed_files),
        Language::Rust => resolve_rust(importing_file, specifier, indexed_files),
        Language::C | Language::Cpp => probe(&join(importing_dir, specifier), &[""], indexed_files)
            .or_else(|| probe(&normalize_path(specifier), &[""], indexed_files)),
        _ => None,
    }
}

/// `.models` resolves next to the importer, `..core.db` one package up,
/// `app.models` from the root or the importer's directory.
fn resolve_python(importing_dir: &str, specifier: &str, indexed_files: &HashSet<String>) -> Option<String> {
    let dots = specifier.chars().take_while(|c| *c == '.').count();
    let rest = specifier[dots..].replace('.', "/");

    if dots > 0 {
        let mut base = importing_dir.to_string();
        for _ in 1..dots {
            base = parent_dir(&base).to_string();
        }
        if rest.is_empty() {
            return probe(&join(&base, "__init__.py"), &[""], indexed_files);
        }
        return probe(&join(&base, &rest), PYTHON_PATTERNS, indexed_files);
    }

    probe(&normalize_path(&rest), PYTHON_PATTERNS, indexed_files)
        .or_else(|| probe(&join(importing_dir, &rest), PYTHON_PATTERNS, indexed_files))
        .or_else(|| probe(&join("src", &rest), PYTHON_PATTERNS, indexed_files))
}

/// `crate::a::b` maps to `src/a/b.rs` or `src/a/b/mod.rs`, dropping
/// trailing segments that name items rather than modules.
fn resolve_rust(importing_file: &str, specifier: &str, indexed_files: &HashSet<String>) -> Option<String> {
    let mut segments: Vec<&str> = specifier.split("::").filter(|s| !s.is_empty()).collect();
    let base = match segments.first().copied() {
        Some("crate") => {
            segments.remove(0);
            crate_src_root(importing_file)
        }
        Some("super") => {
            segments.remove(0);
            parent_dir(&rust_module_dir(importing_file)).to_string()
        }
        Some("self") => {
            segments.remove(0);
            rust_module_dir(importing_file)
        }
        _ => return None,
    };

    while !segments.is_empty() {
        let path = join(&base, &segments.join("/"));
        if let Some(found) = probe(&path, RUST_PATTERNS, indexed_files) {
            return Some(found);
        }
        segments.pop();
    }
    ["lib.rs", "main.rs", "mod.rs"]
        .iter()
        .find_map(|f| probe(&join(&base, f), &[""], indexed_files))
}

/// The `src` directory containing `file`, or `src` when none is on the path.
fn crate_src_root(file: &str) -> String {
    match file.rfind("src/") {
        Some(pos) => file[..pos + 3].to_string(),
        None => "src".to_string(),
    }
}

/// Directory whose files are children of `file`'s module.
fn rust_module_dir(file: &str) -> String {
    let dir = parent_dir(file);
    let stem = file.rsplit('/').next().unwrap_or(file);
    match stem {
        "mod.rs" | "lib.rs" | "main.rs" => dir.to_string(),
        other => join(dir, other.trim_end_matches(".rs")),
    }
}

fn probe(base: &str, patterns: &[&str], indexed_files: &HashSet<String>) -> Option<String> {
    patterns
        .iter()
        .map(|ext| format!("{base}{ext}"))
        .find(|candidate| indexed_files.contains(candidate))
}

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[..pos],
        None => "",
    }
}

fn join(dir: &str, rel: &str) -> String {
    if dir.is_empty() {
        normalize_path(rel)
    } else {
        normalize_path(&format!("{dir}/{rel}"))
    }
}

/// Normalize a file path by resolving `.` and `..` components.
///
/// `src/routes/../utils/./auth` → `src/utils/auth`
pub fn normalize_path(path: &str) -> String {
    let pb = PathBuf::from(path);
    let mut components: Vec<String> = Vec::new();

    for component in pb.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                components.pop();
            }
            Component::Normal(s) => {
                components.push(s.to_string_lossy().to_string());
            }
            _ => {}
        }
    }

    components.join("/")
}

/// File stem used to match new files against unresolved specifiers.
pub fn path_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = name.split('.').next().unwrap_or(name);
    match stem {
        "index" | "__init__" | "mod" => parent_dir(path).rsplit('/').next().unwrap_or(stem),
        _ => stem,
    }
}

/// Stem of the module an import specifier names, comparable with
/// [`path_stem`].
///
/// Path specifiers (`./orders.service`, `github.com/x/y`) take the last `/`
/// segment up to its first dot, the same way a file name is stemmed.
/// Dotted or `::` module paths (`..core.db`, `crate::store`) take their
/// last segment.
pub fn specifier_stem(specifier: &str) -> &str {
    let trimmed = specifier.trim_end_matches('/');
    if let Some((_, name)) = trimmed.rsplit_once('/') {
        return name.split('.').next().filter(|s| !s.is_empty()).unwrap_or(name);
    }
    trimmed
        .rsplit(|c| c == '.' || c == ':')
        .find(|s| !s.is_empty())
        .unwrap_or(trimmed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::make_symbol_id;
    use test_case::test_case;

    fn files(paths: &[&str]) -> HashSet<String> {
        paths.iter().map(|s| s.to_string()).collect()
    }

    fn make_node(file: &str, name: &str, kind: SymbolKind, exported: bool) -> Symbol {
        Symbol {
            id: make_symbol_id(kind, file, name),
            kind,
            name: name.to_string(),
            qualified_name: name.to_string(),
            file_path: file.to_string(),
            start_line: 1,
            end_line: 10,
            language: Language::TypeScript,
            signature: None,
            exported,
        }
    }

    fn import(file: &str, spec: &str, names: &[&str]) -> ImportRef {
        ImportRef {
            symbol_id: make_symbol_id(SymbolKind::Import, file, spec),
            file_path: file.to_string(),
            specifier: spec.to_string(),
            names: names.iter().map(|s| s.to_string()).collect(),
            line: 1,
        }
    }

    // -- normalize_path -------------------------------------------------------

    #[test_case("src/routes/../utils/auth", "src/utils/auth" ; "dotdot")]
    #[test_case("src/./utils/./auth", "src/utils/auth" ; "dot")]
    #[test_case("src/a/b/../../c/d", "src/c/d" ; "multiple_dotdot")]
    fn normalize(input: &str, expected: &str) {
        assert_eq!(normalize_path(input), expected);
    }

    // -- resolve_specifier ----------------------------------------------------

    #[test_case("src/main.ts", "./utils", &["src/utils.ts"], Some("src/utils.ts") ; "relative_ts")]
    #[test_case("src/routes/api.ts", "../utils/auth", &["src/utils/auth.ts"], Some("src/utils/auth.ts") ; "dotdot_ts")]
    #[test_case("src/main.ts", "./utils", &["src/utils/index.ts"], Some("src/utils/index.ts") ; "index_barrel")]
    #[test_case("src/main.ts", "./config.json", &["src/config.json"], Some("src/config.json") ; "exact_extension")]
    #[test_case("src/main.ts", "./nonexistent", &[], None ; "missing")]
    #[test_case("src/main.ts", "express", &["express.ts"], None ; "package_import")]
    fn resolves_ecmascript(from: &str, spec: &str, indexed: &[&str], expected: Option<&str>) {
        let got = resolve_specifier(from, spec, Language::TypeScript, &files(indexed));
        assert_eq!(got.as_deref(), expected);
    }

    #[test_case("app/api/views.py", ".models", &["app/api/models.py"], Some("app/api/models.py") ; "sibling")]
    #[test_case("app/api/views.py", "..core", &["app/core/__init__.py"], Some("app/core/__init__.py") ; "parent_package")]
    #[test_case("app/api/views.py", "app.core.db", &["app/core/db.py"], Some("app/core/db.py") ; "absolute_dotted")]
    #[test_case("scripts/run.py", "helpers", &["scripts/helpers.py"], Some("scripts/helpers.py") ; "script_sibling")]
    #[test_case("app/x.py", "os", &[], None ; "stdlib")]
    fn resolves_python(from: &str, spec: &str, indexed: &[&str], expected: Option<&str>) {
        let got = resolve_specifier(from, spec, Language::Python, &files(indexed));
        assert_eq!(got.as_deref(), expected);
    }

    #[test_case("src/engine.rs", "crate::store", &["src/store.rs"], Some("src/store.rs") ; "crate_file")]
    #[test_case("src/engine.rs", "crate::store::Store", &["src/store/mod.rs"], Some("src/store/mod.rs") ; "crate_item_in_mod")]
    #[test_case("src/graph/tracer.rs", "super::store", &["src/graph/store.rs"], Some("src/graph/store.rs") ; "super_sibling")]
    #[test_case("src/main.rs", "std::fs", &["src/fs.rs"], None ; "std_path")]
    fn resolves_rust(from: &str, spec: &str, indexed: &[&str], expected: Option<&str>) {
        let got = resolve_specifier(from, spec, Language::Rust, &files(indexed));
        assert_eq!(got.as_deref(), expected);
    }

    #[test]
    fn resolves_quoted_c_include_next_to_includer() {
        let indexed = files(&["lib/util.h", "lib/main.c"]);
        assert_eq!(
            resolve_specifier("lib/main.c", "util.h", Language::C, &indexed).as_deref(),
            Some("lib/util.h")
        );
    }

    // -- link_imports ---------------------------------------------------------

    #[test]
    fn named_imports_link_to_symbols() {
        let nodes_by_file: HashMap<String, Vec<Symbol>> = [(
            "src/utils.ts".to_string(),
            vec![
                make_node("src/utils.ts", "validate", SymbolKind::Function, true),
                make_node("src/utils.ts", "Parser", SymbolKind::Class, true),
            ],
        )]
        .into();
        let indexed = files(&["src/main.ts", "src/utils.ts"]);
        let langs: HashMap<String, Language> = [
            ("src/main.ts".to_string(), Language::TypeScript),
            ("src/utils.ts".to_string(), Language::TypeScript),
        ]
        .into();
        let refs = vec![import("src/main.ts", "./utils", &["validate", "Parser"])];
        let resolved = resolve_import_refs(&refs, &langs, &indexed);
        let edges = link_imports(&resolved, &nodes_by_file, &indexed, &langs);

        let targets: Vec<&str> = edges.iter().filter_map(|e| e.target.as_deref()).collect();
        assert_eq!(
            targets,
            vec!["function:src/utils.ts:validate", "class:src/utils.ts:Parser"]
        );
        assert!(edges.iter().all(|e| e.kind == EdgeKind::Import && e.resolved));
    }

    #[test]
    fn wildcard_imports_link_to_module_symbol() {
        let indexed = files(&["src/main.ts", "src/utils.ts"]);
        let langs: HashMap<String, Language> =
            [("src/main.ts".to_string(), Language::TypeScript)].into();
        let refs = vec![import("src/main.ts", "./utils", &[])];
        let resolved = resolve_import_refs(&refs, &langs, &indexed);
        let edges = link_imports(&resolved, &HashMap::new(), &indexed, &langs);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target.as_deref(), Some("module:src/utils.ts:<module>"));
    }

    #[test]
    fn python_submodule_import_links_to_module_file() {
        let indexed = files(&["app/views.py", "app/handlers/__init__.py", "app/handlers/orders.py"]);
        let langs: HashMap<String, Language> =
            [("app/views.py".to_string(), Language::Python)].into();
        let refs = vec![import("app/views.py", ".handlers", &["orders"])];
        let resolved = resolve_import_refs(&refs, &langs, &indexed);
        assert_eq!(resolved[0].target_file.as_deref(), Some("app/handlers/__init__.py"));
        let edges = link_imports(&resolved, &HashMap::new(), &indexed, &langs);
        assert_eq!(edges[0].target.as_deref(), Some("module:app/handlers/orders.py:<module>"));
    }

    #[test]
    fn package_imports_produce_no_edges() {
        let indexed = files(&["src/main.ts"]);
        let langs: HashMap<String, Language> =
            [("src/main.ts".to_string(), Language::TypeScript)].into();
        let refs = vec![import("src/main.ts", "express", &["Router"])];
        let resolved = resolve_import_refs(&refs, &langs, &indexed);
        assert!(link_imports(&resolved, &HashMap::new(), &indexed, &langs).is_empty());
    }

    #[test]
    fn import_index_reports_named_and_whole_imports() {
        let resolved = vec![
            ResolvedImport {
                import: import("a.ts", "./b", &["save"]),
                target_file: Some("b.ts".into()),
            },
            ResolvedImport {
                import: import("a.ts", "./c", &[]),
                target_file: Some("c.ts".into()),
            },
        ];
        let index = ImportIndex::build(&resolved);
        let providing = index.files_providing("a.ts", "save");
        assert!(providing.contains("b.ts") && providing.contains("c.ts"));
        assert_eq!(index.files_providing("a.ts", "load"), ["c.ts"].into());
        assert!(index.files_providing("z.ts", "save").is_empty());
    }

    #[test_case("src/orders/index.ts", "orders" ; "index_file")]
    #[test_case("app/models.py", "models" ; "plain")]
    #[test_case("pkg/__init__.py", "pkg" ; "init")]
    #[test_case("src/orders.service.ts", "orders" ; "dotted_name")]
    fn stems(path: &str, expected: &str) {
        assert_eq!(path_stem(path), expected);
    }

    #[test_case("./orders", "orders" ; "relative")]
    #[test_case("..core.db", "db" ; "python_dotted")]
    #[test_case("crate::store", "store" ; "rust")]
    #[test_case("./config.json", "config" ; "with_extension")]
    #[test_case("./orders.service", "orders" ; "dotted_file_name")]
    #[test_case("../lib/orders.service.ts", "orders" ; "dotted_file_name_with_extension")]
    #[test_case("github.com/acme/billing", "billing" ; "go_module_path")]
    #[test_case("com.acme.Orders", "Orders" ; "java_package")]
    fn specifier_stems(spec: &str, expected: &str) {
        assert_eq!(specifier_stem(spec), expected);
    }
}
