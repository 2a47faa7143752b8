//! Resolution: import linking and call-site resolution over the stored graph.
//!
//! Both passes read the persisted symbols, call sites, and import refs and
//! rewrite only their own edge kinds (`call`, `unknown`, `import`). A
//! [`ChangeScope`] bounds the rewrite to what a set of changed files can
//! influence; `None` rewrites everything.

pub mod calls;
pub mod imports;

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::config::schema::ResolutionConfig;
use crate::error::Result;
use crate::graph::store::GraphStore;
use crate::types::{Language, Symbol};

use calls::{CallResolver, SymbolIndex};
use imports::{link_imports, path_stem, resolve_import_refs, specifier_stem, ImportIndex, ResolvedImport};

/// Files and symbol names touched by a change.
///
/// `names` must include names that disappeared as well as names that
/// appeared, so callers of a deleted symbol are re-resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeScope {
    pub files: HashSet<String>,
    pub names: HashSet<String>,
}

impl ChangeScope {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.names.is_empty()
    }
}

/// Edge counts written by one relink pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelinkStats {
    pub call_sites: usize,
    pub resolved_calls: usize,
    pub unresolved_calls: usize,
    pub import_edges: usize,
}

/// Immutable snapshot of everything resolution needs.
pub struct ResolutionContext {
    pub symbols: SymbolIndex,
    pub imports: ImportIndex,
    pub resolved_imports: Vec<ResolvedImport>,
    nodes_by_file: HashMap<String, Vec<Symbol>>,
    indexed: HashSet<String>,
    languages: HashMap<String, Language>,
}

impl ResolutionContext {
    pub fn load(store: &GraphStore) -> Result<Self> {
        let files = store.all_files()?;
        let languages: HashMap<String, Language> =
            files.iter().map(|f| (f.path.clone(), f.language)).collect();
        let indexed: HashSet<String> = files.into_iter().map(|f| f.path).collect();

        let all_symbols = store.all_symbols()?;
        let symbols = SymbolIndex::build(&all_symbols);
        let mut nodes_by_file: HashMap<String, Vec<Symbol>> = HashMap::new();
        for s in all_symbols {
            nodes_by_file.entry(s.file_path.clone()).or_default().push(s);
        }

        let refs = store.all_import_refs()?;
        let resolved_imports = resolve_import_refs(&refs, &languages, &indexed);
        let imports = ImportIndex::build(&resolved_imports);

        Ok(Self {
            symbols,
            imports,
            resolved_imports,
            nodes_by_file,
            indexed,
            languages,
        })
    }

    /// Import refs whose edges a change to `scope` can alter.
    fn affected_imports(&self, scope: &ChangeScope) -> Vec<ResolvedImport> {
        let stems: HashSet<&str> = scope.files.iter().map(|f| path_stem(f)).collect();
        self.resolved_imports
            .iter()
            .filter(|r| {
                scope.files.contains(&r.import.file_path)
                    || r.target_file.as_ref().is_some_and(|t| scope.files.contains(t))
                    || stems.contains(specifier_stem(&r.import.specifier))
                    || r.import.names.iter().any(|n| stems.contains(n.as_str()))
            })
            .cloned()
            .collect()
    }
}

/// Rewrite import and call edges, fully or for `scope`.
pub fn relink(
    store: &GraphStore,
    config: &ResolutionConfig,
    scope: Option<&ChangeScope>,
) -> Result<RelinkStats> {
    let ctx = ResolutionContext::load(store)?;
    let resolutions = store.resolutions()?;
    let resolver = CallResolver::new(&ctx.symbols, &ctx.imports, &config.ignore_callees, &resolutions);

    store.write(|store| {
        let mut stats = RelinkStats::default();

        let (import_refs, sites) = match scope {
            None => {
                store.delete_import_edges(None)?;
                store.delete_call_edges(None)?;
                (ctx.resolved_imports.clone(), store.all_call_sites()?)
            }
            Some(scope) => {
                let affected = ctx.affected_imports(scope);
                let ids: HashSet<String> = affected.iter().map(|r| r.import.symbol_id.clone()).collect();
                store.delete_import_edges(Some(&ids))?;
                store.delete_call_edges(Some((&scope.files, &scope.names)))?;
                (affected, store.call_sites_for(&scope.files, &scope.names)?)
            }
        };

        let import_edges = link_imports(&import_refs, &ctx.nodes_by_file, &ctx.indexed, &ctx.languages);
        stats.import_edges = import_edges.len();
        store.insert_edges(&import_edges)?;

        let call_edges = resolver.resolve_all(&sites);
        stats.call_sites = sites.len();
        stats.resolved_calls = call_edges.iter().filter(|e| e.resolved).count();
        stats.unresolved_calls = call_edges.len() - stats.resolved_calls;
        store.insert_edges(&call_edges)?;

        debug!(
            scoped = scope.is_some(),
            call_sites = stats.call_sites,
            resolved = stats.resolved_calls,
            unresolved = stats.unresolved_calls,
            imports = stats.import_edges,
            "relinked"
        );
        Ok(stats)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
