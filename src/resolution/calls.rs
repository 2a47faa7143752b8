//! Call-site resolution.
//!
//! A call site names a callee by its bare identifier. Candidates are the
//! call-target symbols with that name, narrowed by a fixed tie-break:
//!
//! 1. same file (restricted to the caller's type for `this`/`self` calls)
//! 2. files the caller imports the name from, or imports whole
//! 3. files in the caller's directory
//!
//! The first tier with any candidate decides. One candidate resolves the
//! call; more than one produces an unresolved edge listing them. No tier
//! matching leaves the call unresolved. There is no repository-wide guess.

use std::collections::{HashMap, HashSet};

use crate::resolution::imports::ImportIndex;
use crate::types::{CallSite, Edge, EdgeKind, EdgeOrigin, Resolution, Symbol};

/// Prefix on the detail of an ambiguous unresolved edge.
pub const AMBIGUOUS_PREFIX: &str = "ambiguous: ";

/// Outcome of resolving one call site.
#[derive(Debug, Clone, PartialEq)]
pub enum CallResolution {
    Resolved { target: String, confidence: f64 },
    Ambiguous(Vec<String>),
    Unresolved,
    Ignored,
}

/// Call-target symbols grouped by bare name.
#[derive(Debug, Default, Clone)]
pub struct SymbolIndex {
    by_name: HashMap<String, Vec<Symbol>>,
}

impl SymbolIndex {
    pub fn build<'a>(symbols: impl IntoIterator<Item = &'a Symbol>) -> Self {
        let mut by_name: HashMap<String, Vec<Symbol>> = HashMap::new();
        for s in symbols.into_iter().filter(|s| s.kind.is_call_target()) {
            by_name.entry(s.name.clone()).or_default().push(s.clone());
        }
        for candidates in by_name.values_mut() {
            candidates.sort_by(|a, b| a.id.cmp(&b.id));
        }
        Self { by_name }
    }

    pub fn named(&self, name: &str) -> &[Symbol] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Resolves call sites against a symbol and import index.
pub struct CallResolver<'a> {
    symbols: &'a SymbolIndex,
    imports: &'a ImportIndex,
    ignore: HashSet<&'a str>,
    manual: HashMap<(Option<&'a str>, &'a str), &'a str>,
}

impl<'a> CallResolver<'a> {
    pub fn new(
        symbols: &'a SymbolIndex,
        imports: &'a ImportIndex,
        ignore_callees: &'a [String],
        resolutions: &'a [Resolution],
    ) -> Self {
        let manual = resolutions
            .iter()
            .filter(|r| matches!(r.kind, EdgeKind::Call | EdgeKind::Unknown))
            .map(|r| ((r.source.as_deref(), r.key.as_str()), r.target.as_str()))
            .collect();
        Self {
            symbols,
            imports,
            ignore: ignore_callees.iter().map(String::as_str).collect(),
            manual,
        }
    }

    /// Apply the tie-break to one call site.
    pub fn resolve(&self, site: &CallSite) -> CallResolution {
        if self.ignore.contains(site.callee.as_str()) {
            return CallResolution::Ignored;
        }
        let all = self.symbols.named(&site.callee);
        if all.is_empty() {
            return CallResolution::Unresolved;
        }

        let self_call = matches!(site.receiver.as_deref(), Some("this" | "self" | "cls" | "super"));
        let same_file: Vec<&Symbol> = all.iter().filter(|s| s.file_path == site.file_path).collect();
        let same_file = if self_call {
            narrow_to_owner_type(same_file, &site.owner)
        } else {
            same_file
        };
        if let Some(decided) = decide(&same_file, 1.0) {
            return decided;
        }

        let providers = self.imports.files_providing(&site.file_path, &site.callee);
        let imported: Vec<&Symbol> = all
            .iter()
            .filter(|s| providers.contains(s.file_path.as_str()))
            .collect();
        if let Some(decided) = decide(&imported, 1.0) {
            return decided;
        }

        let dir = parent_dir(&site.file_path);
        let same_dir: Vec<&Symbol> = all.iter().filter(|s| parent_dir(&s.file_path) == dir).collect();
        if let Some(decided) = decide(&same_dir, 1.0) {
            return decided;
        }

        CallResolution::Unresolved
    }

    /// Turn call sites into `call` and `unknown` edges.
    ///
    /// A reviewer resolution for the exact owner takes precedence over the
    /// tie-break. One without an owner only fills in sites the tie-break
    /// left unresolved or ambiguous.
    pub fn resolve_all(&self, sites: &[CallSite]) -> Vec<Edge> {
        let manual_edge = |site: &CallSite, target: &str| {
            Edge::resolved(
                EdgeKind::Call,
                &site.owner,
                target,
                Some(&site.callee),
                &site.file_path,
                site.line,
                1.0,
                EdgeOrigin::Manual,
            )
        };
        let mut edges = Vec::with_capacity(sites.len());
        for site in sites {
            if let Some(target) = self.manual.get(&(Some(site.owner.as_str()), site.callee.as_str())) {
                edges.push(manual_edge(site, target));
                continue;
            }
            let fallback = self.manual.get(&(None, site.callee.as_str()));

            match self.resolve(site) {
                CallResolution::Resolved { target, confidence } => edges.push(Edge::resolved(
                    EdgeKind::Call,
                    &site.owner,
                    &target,
                    Some(&site.callee),
                    &site.file_path,
                    site.line,
                    confidence,
                    EdgeOrigin::Static,
                )),
                CallResolution::Ambiguous(_) | CallResolution::Unresolved if fallback.is_some() => {
                    if let Some(target) = fallback {
                        edges.push(manual_edge(site, target));
                    }
                }
                CallResolution::Ambiguous(candidates) => edges.push(Edge::unresolved(
                    EdgeKind::Unknown,
                    &site.owner,
                    &site.callee,
                    &site.file_path,
                    site.line,
                    EdgeOrigin::Static,
                    Some(format!("{AMBIGUOUS_PREFIX}{}", candidates.join(", "))),
                )),
                CallResolution::Unresolved => edges.push(Edge::unresolved(
                    EdgeKind::Unknown,
                    &site.owner,
                    &site.callee,
                    &site.file_path,
                    site.line,
                    EdgeOrigin::Static,
                    None,
                )),
                CallResolution::Ignored => {}
            }
        }
        edges
    }
}

fn decide(tier: &[&Symbol], confidence: f64) -> Option<CallResolution> {
    match tier {
        [] => None,
        [only] => Some(CallResolution::Resolved {
            target: only.id.clone(),
            confidence,
        }),
        many => Some(CallResolution::Ambiguous(many.iter().map(|s| s.id.clone()).collect())),
    }
}

/// For `this.save()` inside `Order.create`, keep only `Order.*` candidates.
/// Falls back to the unfiltered set when the owner has no container.
fn narrow_to_owner_type<'s>(candidates: Vec<&'s Symbol>, owner_id: &str) -> Vec<&'s Symbol> {
    let owner_qualified = owner_id.rsplit(':').next().unwrap_or(owner_id);
    let Some((container, _)) = owner_qualified.rsplit_once('.') else {
        return candidates;
    };
    let prefix = format!("{container}.");
    let narrowed: Vec<&Symbol> = candidates
        .iter()
        .copied()
        .filter(|s| s.qualified_name.starts_with(&prefix))
        .collect();
    if narrowed.is_empty() {
        candidates
    } else {
        narrowed
    }
}

fn parent_dir(path: &str) -> &str {
    path.rfind('/').map_or("", |pos| &path[..pos])
}

/// Candidate ids listed in an ambiguous edge's detail.
pub fn ambiguous_candidates(detail: Option<&str>) -> Option<Vec<String>> {
    detail
        .and_then(|d| d.strip_prefix(AMBIGUOUS_PREFIX))
        .map(|rest| rest.split(", ").map(str::to_string).collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::imports::ResolvedImport;
    use crate::types::{make_symbol_id, ImportRef, Language, SymbolKind};
    use pretty_assertions::assert_eq;

    fn sym(file: &str, qualified: &str, kind: SymbolKind) -> Symbol {
        let name = qualified.rsplit('.').next().unwrap_or(qualified);
        Symbol {
            id: make_symbol_id(kind, file, qualified),
            kind,
            name: name.to_string(),
            qualified_name: qualified.to_string(),
            file_path: file.to_string(),
            start_line: 1,
            end_line: 5,
            language: Language::TypeScript,
            signature: None,
            exported: true,
        }
    }

    fn site(owner: &str, file: &str, callee: &str, receiver: Option<&str>) -> CallSite {
        CallSite {
            owner: owner.to_string(),
            callee: callee.to_string(),
            receiver: receiver.map(str::to_string),
            file_path: file.to_string(),
            line: 3,
        }
    }

    fn import_of(file: &str, target: &str, names: &[&str]) -> ResolvedImport {
        ResolvedImport {
            import: ImportRef {
                symbol_id: make_symbol_id(SymbolKind::Import, file, target),
                file_path: file.to_string(),
                specifier: target.to_string(),
                names: names.iter().map(|s| s.to_string()).collect(),
                line: 1,
            },
            target_file: Some(target.to_string()),
        }
    }

    #[test]
    fn same_file_wins_over_imports() {
        let symbols = vec![
            sym("src/a.ts", "save", SymbolKind::Function),
            sym("src/b.ts", "save", SymbolKind::Function),
        ];
        let index = SymbolIndex::build(&symbols);
        let imports = ImportIndex::build(&[import_of("src/a.ts", "src/b.ts", &["save"])]);
        let resolver = CallResolver::new(&index, &imports, &[], &[]);
        assert_eq!(
            resolver.resolve(&site("function:src/a.ts:run", "src/a.ts", "save", None)),
            CallResolution::Resolved {
                target: "function:src/a.ts:save".into(),
                confidence: 1.0
            }
        );
    }

    #[test]
    fn imported_file_wins_over_same_directory() {
        let symbols = vec![
            sym("src/b.ts", "save", SymbolKind::Function),
            sym("lib/c.ts", "save", SymbolKind::Function),
        ];
        let index = SymbolIndex::build(&symbols);
        let imports = ImportIndex::build(&[import_of("src/a.ts", "lib/c.ts", &["save"])]);
        let resolver = CallResolver::new(&index, &imports, &[], &[]);
        match resolver.resolve(&site("function:src/a.ts:run", "src/a.ts", "save", None)) {
            CallResolution::Resolved { target, .. } => assert_eq!(target, "function:lib/c.ts:save"),
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[test]
    fn same_directory_is_last_resort() {
        let symbols = vec![
            sym("src/b.ts", "save", SymbolKind::Function),
            sym("lib/c.ts", "save", SymbolKind::Function),
        ];
        let index = SymbolIndex::build(&symbols);
        let imports = ImportIndex::default();
        let resolver = CallResolver::new(&index, &imports, &[], &[]);
        match resolver.resolve(&site("function:src/a.ts:run", "src/a.ts", "save", None)) {
            CallResolution::Resolved { target, .. } => assert_eq!(target, "function:src/b.ts:save"),
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[test]
    fn no_global_guess_for_distant_unique_name() {
        let symbols = vec![sym("far/away.ts", "save", SymbolKind::Function)];
        let index = SymbolIndex::build(&symbols);
        let imports = ImportIndex::default();
        let resolver = CallResolver::new(&index, &imports, &[], &[]);
        assert_eq!(
            resolver.resolve(&site("function:src/a.ts:run", "src/a.ts", "save", None)),
            CallResolution::Unresolved
        );
    }

    #[test]
    fn two_candidates_in_one_tier_are_ambiguous() {
        let symbols = vec![
            sym("src/a.ts", "Order.save", SymbolKind::Method),
            sym("src/a.ts", "User.save", SymbolKind::Method),
        ];
        let index = SymbolIndex::build(&symbols);
        let imports = ImportIndex::default();
        let resolver = CallResolver::new(&index, &imports, &[], &[]);
        let edges = resolver.resolve_all(&[site("function:src/a.ts:run", "src/a.ts", "save", Some("repo"))]);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].kind, EdgeKind::Unknown);
        assert!(!edges[0].resolved);
        assert_eq!(
            ambiguous_candidates(edges[0].detail.as_deref()),
            Some(vec![
                "method:src/a.ts:Order.save".to_string(),
                "method:src/a.ts:User.save".to_string()
            ])
        );
    }

    #[test]
    fn self_receiver_narrows_to_owner_type() {
        let symbols = vec![
            sym("src/a.ts", "Order.save", SymbolKind::Method),
            sym("src/a.ts", "User.save", SymbolKind::Method),
        ];
        let index = SymbolIndex::build(&symbols);
        let imports = ImportIndex::default();
        let resolver = CallResolver::new(&index, &imports, &[], &[]);
        match resolver.resolve(&site("method:src/a.ts:Order.create", "src/a.ts", "save", Some("this"))) {
            CallResolution::Resolved { target, .. } => assert_eq!(target, "method:src/a.ts:Order.save"),
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[test]
    fn ignored_callees_produce_no_edge() {
        let index = SymbolIndex::default();
        let imports = ImportIndex::default();
        let ignore = vec!["console".to_string()];
        let resolver = CallResolver::new(&index, &imports, &ignore, &[]);
        assert!(resolver
            .resolve_all(&[site("module:a.ts:<module>", "a.ts", "console", None)])
            .is_empty());
    }

    #[test]
    fn unknown_callee_is_unresolved_with_key() {
        let index = SymbolIndex::default();
        let imports = ImportIndex::default();
        let resolver = CallResolver::new(&index, &imports, &[], &[]);
        let edges = resolver.resolve_all(&[site("function:a.ts:f", "a.ts", "mystery", None)]);
        assert_eq!(edges[0].key.as_deref(), Some("mystery"));
        assert!(edges[0].target.is_none());
        assert!(edges[0].detail.is_none());
    }

    #[test]
    fn manual_resolution_for_owner_overrides_tie_break() {
        let symbols = vec![sym("src/a.ts", "save", SymbolKind::Function)];
        let index = SymbolIndex::build(&symbols);
        let imports = ImportIndex::default();
        let resolutions = vec![Resolution {
            kind: EdgeKind::Unknown,
            key: "save".into(),
            source: Some("function:src/a.ts:run".into()),
            target: "function:lib/db.ts:save".into(),
            note: None,
        }];
        let resolver = CallResolver::new(&index, &imports, &[], &resolutions);
        let edges = resolver.resolve_all(&[site("function:src/a.ts:run", "src/a.ts", "save", None)]);
        assert_eq!(edges[0].origin, EdgeOrigin::Manual);
        assert_eq!(edges[0].target.as_deref(), Some("function:lib/db.ts:save"));
    }

    #[test]
    fn ownerless_resolution_only_fills_unresolved_sites() {
        let symbols = vec![sym("src/a.ts", "save", SymbolKind::Function)];
        let index = SymbolIndex::build(&symbols);
        let imports = ImportIndex::default();
        let resolutions = vec![Resolution {
            kind: EdgeKind::Unknown,
            key: "save".into(),
            source: None,
            target: "function:lib/db.ts:save".into(),
            note: None,
        }];
        let resolver = CallResolver::new(&index, &imports, &[], &resolutions);
        let edges = resolver.resolve_all(&[
            site("function:src/a.ts:run", "src/a.ts", "save", None),
            site("function:web/b.ts:go", "web/b.ts", "save", None),
        ]);
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].origin, EdgeOrigin::Static);
        assert_eq!(edges[0].target.as_deref(), Some("function:src/a.ts:save"));
        assert_eq!(edges[1].origin, EdgeOrigin::Manual);
        assert_eq!(edges[1].kind, EdgeKind::Call);
        assert_eq!(edges[1].target.as_deref(), Some("function:lib/db.ts:save"));
    }

    #[test]
    fn non_callable_kinds_are_not_candidates() {
        let symbols = vec![sym("src/a.ts", "save", SymbolKind::Constant)];
        let index = SymbolIndex::build(&symbols);
        assert!(index.named("save").is_empty());
    }
}
