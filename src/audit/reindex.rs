//! Incremental reindex driven by a change set.
//!
//! The change set comes from `git diff --name-status -M` between two
//! revisions, or, outside a git range, from comparing content hashes
//! against the `files` table. Changed files are analyzed in parallel; the
//! whole write-back, from the first `replace_file` to the updated
//! `last_reindex_commit`, runs in one transaction so a crash leaves the
//! prior index intact.
//!
//! Only entry points whose stored reach touches a changed symbol are
//! retraced. Touched symbols are the old and new symbols of changed files
//! plus the sources of every edge that appeared or disappeared.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audit::coverage::compute_coverage;
use crate::config::schema::CodeTraceConfig;
use crate::error::Result;
use crate::git::{self, ChangeKind, FileChange};
use crate::graph::designate::apply_manual_designations;
use crate::graph::store::{GraphStore, LAST_REINDEX_COMMIT};
use crate::graph::tracer::{retire_dead_entries, retrace, validate};
use crate::indexer::parser::CodeParser;
use crate::indexer::pipeline::analyze_bytes;
use crate::indexer::walker::{is_excluded, walk_sources};
use crate::observability::IndexMetrics;
use crate::probe::merge::remerge;
use crate::resolution::{relink, ChangeScope};
use crate::types::{content_hash, EdgeKind, FileGraph, ParseStatus, PathwayStatus};

/// Revision range for a reindex. Both ends default: `from` to the stored
/// `last_reindex_commit`, `to` to `HEAD`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexOptions {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Where changed file contents are read from.
#[derive(Debug, Clone)]
enum ContentSource<'a> {
    WorkingTree(&'a Path),
    Revision { repo: &'a Path, rev: String },
}

impl ContentSource<'_> {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        match self {
            Self::WorkingTree(root) => Ok(std::fs::read(root.join(path))?),
            Self::Revision { repo, rev } => git::show_file(repo, rev, path),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReindexReport {
    /// `git` or `hash`.
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub changes: Vec<FileChange>,
    pub touched_symbols: usize,
    pub retraced_entries: usize,
    pub metrics: IndexMetrics,
}

// ---------------------------------------------------------------------------
// Change detection
// ---------------------------------------------------------------------------

/// Changes between the stored hashes and the tree on disk. Renames show up
/// as a deletion plus an addition.
pub fn hash_changes(store: &GraphStore, root: &Path, config: &CodeTraceConfig) -> Result<Vec<FileChange>> {
    let stored = store.file_hashes()?;
    let files = walk_sources(root, &config.index)?;

    let mut changes = Vec::new();
    let mut present = HashSet::new();
    for f in &files {
        present.insert(f.path.as_str());
        let hash = match std::fs::read(&f.abs_path) {
            Ok(bytes) => content_hash(&bytes),
            Err(e) => {
                warn!(file = %f.path, error = %e, "unreadable file");
                String::new()
            }
        };
        match stored.get(&f.path) {
            None => changes.push(FileChange::new(&f.path, ChangeKind::Added)),
            Some(old) if *old != hash => changes.push(FileChange::new(&f.path, ChangeKind::Modified)),
            Some(_) => {}
        }
    }
    let mut deleted: Vec<&String> = stored.keys().filter(|p| !present.contains(p.as_str())).collect();
    deleted.sort();
    changes.extend(deleted.into_iter().map(|p| FileChange::new(p, ChangeKind::Deleted)));
    Ok(changes)
}

fn indexable(path: &str, config: &CodeTraceConfig) -> bool {
    CodeParser::is_supported(path) && !is_excluded(path, &config.index.exclude)
}

/// Drop changes to files that would never be indexed. A rename across the
/// boundary becomes a plain addition or deletion.
pub fn filter_changes(changes: Vec<FileChange>, config: &CodeTraceConfig) -> Vec<FileChange> {
    changes
        .into_iter()
        .filter_map(|c| {
            let from = match &c.kind {
                ChangeKind::Renamed { from } => from.clone(),
                _ => return indexable(&c.path, config).then_some(c),
            };
            match (indexable(&from, config), indexable(&c.path, config)) {
                (true, true) => Some(c),
                (true, false) => Some(FileChange::new(from, ChangeKind::Deleted)),
                (false, true) => Some(FileChange::new(c.path, ChangeKind::Added)),
                (false, false) => None,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Reindex
// ---------------------------------------------------------------------------

/// Bring the index up to date with `root` and return what changed.
pub fn reindex(
    store: &GraphStore,
    root: &Path,
    config: &CodeTraceConfig,
    options: &ReindexOptions,
) -> Result<ReindexReport> {
    let started = Instant::now();
    let in_repo = git::is_repo(root);

    let from = match (&options.from, in_repo) {
        (Some(rev), _) => Some(rev.clone()),
        (None, true) => store.get_meta(LAST_REINDEX_COMMIT)?,
        (None, false) => None,
    };

    let (mode, from, to, changes, source) = match from {
        Some(from) if in_repo => {
            let from = git::resolve_revision(root, &from)?;
            let to = git::resolve_revision(root, options.to.as_deref().unwrap_or("HEAD"))?;
            let changes = git::diff_name_status(root, &from, &to)?;
            let source = ContentSource::Revision {
                repo: root,
                rev: to.clone(),
            };
            ("git", Some(from), Some(to), changes, source)
        }
        _ => {
            if options.to.is_some() {
                warn!("--to needs a git repository and a start revision; comparing content hashes instead");
            }
            let head = if in_repo { git::head_commit(root).ok() } else { None };
            let changes = hash_changes(store, root, config)?;
            ("hash", None, head, changes, ContentSource::WorkingTree(root))
        }
    };
    let changes = filter_changes(changes, config);
    info!(mode, changes = changes.len(), "reindexing");

    // Analysis is pure per file, so it runs before the transaction opens.
    let graphs: HashMap<String, FileGraph> = changes
        .par_iter()
        .filter(|c| c.kind != ChangeKind::Deleted)
        .filter_map(|c| {
            let language = CodeParser::detect_language(&c.path)?;
            let graph = match source.read(&c.path) {
                Ok(bytes) => analyze_bytes(&c.path, language, &bytes, config),
                Err(e) => {
                    warn!(file = %c.path, error = %e, "could not read changed file");
                    FileGraph::unparsed(&c.path, language, String::new(), 0, format!("read failed: {e}"))
                }
            };
            Some((c.path.clone(), graph))
        })
        .collect();

    // A retried transaction starts counting from scratch.
    let (touched, retraced, mut metrics) = store.write(|store| {
        let mut metrics = IndexMetrics::new();
        metrics.files_seen = changes.len();
        let (touched, retraced) = apply_changes(store, root, config, &changes, &graphs, to.as_deref(), &mut metrics)?;
        Ok((touched, retraced, metrics))
    })?;

    metrics.set_duration(started.elapsed());
    metrics.log("reindex");
    Ok(ReindexReport {
        mode,
        from,
        to,
        changes,
        touched_symbols: touched,
        retraced_entries: retraced,
        metrics,
    })
}

/// Everything after analysis. Runs inside the caller's transaction.
fn apply_changes(
    store: &GraphStore,
    root: &Path,
    config: &CodeTraceConfig,
    changes: &[FileChange],
    graphs: &HashMap<String, FileGraph>,
    commit: Option<&str>,
    metrics: &mut IndexMetrics,
) -> Result<(usize, usize)> {
    let edges_before: HashMap<String, String> =
        store.all_edges()?.into_iter().map(|e| (e.id, e.source)).collect();

    let mut scope = ChangeScope::default();
    let mut keys: HashSet<(EdgeKind, String)> = HashSet::new();
    let mut touched: HashSet<String> = HashSet::new();

    // Old side: whatever the changed paths held before.
    for c in changes {
        let old_path = match &c.kind {
            ChangeKind::Renamed { from } => from.as_str(),
            _ => c.path.as_str(),
        };
        for s in store.symbols_by_file(old_path)? {
            scope.names.insert(s.name);
            touched.insert(s.id);
        }
        keys.extend(store.candidate_keys_for_file(old_path)?);
        scope.files.insert(old_path.to_string());
        scope.files.insert(c.path.clone());
    }

    for c in changes {
        match &c.kind {
            ChangeKind::Deleted => {
                store.delete_file(&c.path)?;
                metrics.files_deleted += 1;
            }
            ChangeKind::Renamed { from } => {
                let old_hash = store.get_file(from)?.map(|f| f.content_hash);
                if old_hash.is_some() {
                    store.rename_file(from, &c.path)?;
                    metrics.files_renamed += 1;
                }
                if let Some(graph) = graphs.get(&c.path) {
                    if old_hash.as_deref() != Some(graph.record.content_hash.as_str()) {
                        store.replace_file(graph)?;
                        count_indexed(metrics, graph);
                    }
                }
            }
            ChangeKind::Added | ChangeKind::Modified => {
                if let Some(graph) = graphs.get(&c.path) {
                    store.replace_file(graph)?;
                    count_indexed(metrics, graph);
                }
            }
        }
    }

    // New side.
    for c in changes.iter().filter(|c| c.kind != ChangeKind::Deleted) {
        for s in store.symbols_by_file(&c.path)? {
            scope.names.insert(s.name);
            touched.insert(s.id);
        }
        keys.extend(store.candidate_keys_for_file(&c.path)?);
    }

    relink(store, &config.resolution, Some(&scope))?;
    remerge(store, Some(&keys))?;
    apply_manual_designations(store)?;
    metrics.pathways_broken += retire_dead_entries(store)?;

    let edges_after: HashMap<String, String> =
        store.all_edges()?.into_iter().map(|e| (e.id, e.source)).collect();
    for (id, source) in edges_before.iter().chain(edges_after.iter()) {
        if edges_before.contains_key(id) != edges_after.contains_key(id) {
            touched.insert(source.clone());
        }
    }

    let entries = affected_entries(store, &touched)?;
    debug!(touched = touched.len(), entries = entries.len(), "retrace scope");
    let traced = retrace(store, &config.trace, Some(&entries), Some(&touched), PathwayStatus::Changed)?;
    metrics.pathways_broken += traced.broken;
    metrics.pathways_changed += traced.changed;
    metrics.issues = validate(store)?.len();
    compute_coverage(store, root, &config.coverage)?;

    if let Some(commit) = commit {
        store.set_meta(LAST_REINDEX_COMMIT, commit)?;
    }

    let stats = store.get_stats()?;
    metrics.edges_unresolved = stats.unresolved_edges;
    metrics.edges_resolved = stats.edges - stats.unresolved_edges;
    metrics.pathways = stats.pathways;
    Ok((touched.len(), traced.entries))
}

fn count_indexed(metrics: &mut IndexMetrics, graph: &FileGraph) {
    metrics.files_indexed += 1;
    if graph.record.parse_status == ParseStatus::Unparsed {
        metrics.files_unparsed += 1;
    }
    metrics.symbols += graph.symbols.len();
    metrics.call_sites += graph.call_sites.len();
    metrics.candidates += graph.candidates.len();
}

/// Entry points whose last trace or stored pathways touch any of
/// `symbols`, plus entry points sitting on one of them.
pub fn affected_entries(store: &GraphStore, symbols: &HashSet<String>) -> Result<HashSet<String>> {
    let mut entries = store.entries_reaching(symbols)?;
    for pathway_id in store.pathways_touching(symbols)? {
        if let Some(p) = store.get_pathway(&pathway_id)? {
            entries.insert(p.entry_point_id);
        }
    }
    for ep in store.entry_points()? {
        if symbols.contains(&ep.symbol_id) {
            entries.insert(ep.id);
        }
    }
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::pipeline::index_project;
    use pretty_assertions::assert_eq;

    const EMITTER: &str =
        "export function createOrder(req, res) {\n  bus.emit('order.created', req.body);\n}\napp.post('/orders', createOrder);\n";
    const LISTENER: &str =
        "export function onOrderCreated(o) {\n  db.insert(o);\n}\nbus.on('order.created', onOrderCreated);\n";

    fn tree(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (path, body) in files {
            let p = dir.path().join(path);
            std::fs::create_dir_all(p.parent().unwrap()).unwrap();
            std::fs::write(p, body).unwrap();
        }
        dir
    }

    #[test]
    fn hash_changes_classifies_files() {
        let dir = tree(&[("a.ts", EMITTER), ("b.ts", LISTENER)]);
        let store = GraphStore::new(":memory:").unwrap();
        let config = CodeTraceConfig::default();
        index_project(&store, dir.path(), &config, None).unwrap();
        assert!(hash_changes(&store, dir.path(), &config).unwrap().is_empty());

        std::fs::write(dir.path().join("a.ts"), format!("{EMITTER}// edited\n")).unwrap();
        std::fs::remove_file(dir.path().join("b.ts")).unwrap();
        std::fs::write(dir.path().join("c.ts"), "export const c = 1;\n").unwrap();
        let changes = hash_changes(&store, dir.path(), &config).unwrap();
        assert_eq!(
            changes,
            vec![
                FileChange::new("a.ts", ChangeKind::Modified),
                FileChange::new("c.ts", ChangeKind::Added),
                FileChange::new("b.ts", ChangeKind::Deleted),
            ]
        );
    }

    #[test]
    fn filter_drops_unindexable_paths() {
        let config = CodeTraceConfig::default();
        let changes = vec![
            FileChange::new("README.md", ChangeKind::Modified),
            FileChange::new("src/a.ts", ChangeKind::Added),
            FileChange::new("src/a.ts.bak", ChangeKind::Renamed { from: "src/b.ts".into() }),
            FileChange::new("src/c.py", ChangeKind::Renamed { from: "notes.txt".into() }),
        ];
        assert_eq!(
            filter_changes(changes, &config),
            vec![
                FileChange::new("src/a.ts", ChangeKind::Added),
                FileChange::new("src/b.ts", ChangeKind::Deleted),
                FileChange::new("src/c.py", ChangeKind::Added),
            ]
        );
    }

    #[test]
    fn deleting_outcome_file_breaks_only_its_pathway() {
        let dir = tree(&[
            ("a.ts", EMITTER),
            ("b.ts", LISTENER),
            (
                "c.ts",
                "export function health(req, res) {\n  res.json({ ok: true });\n}\napp.get('/health', health);\n",
            ),
        ]);
        let store = GraphStore::new(":memory:").unwrap();
        let config = CodeTraceConfig::default();
        index_project(&store, dir.path(), &config, None).unwrap();
        let before = store.pathways(Some(PathwayStatus::Valid)).unwrap();
        assert!(!before.is_empty());

        std::fs::remove_file(dir.path().join("b.ts")).unwrap();
        let report = reindex(&store, dir.path(), &config, &ReindexOptions::default()).unwrap();
        assert_eq!(report.mode, "hash");
        assert_eq!(report.changes, vec![FileChange::new("b.ts", ChangeKind::Deleted)]);

        let all = store.pathways(None).unwrap();
        for p in &before {
            let now = all.iter().find(|q| q.id == p.id).unwrap();
            let through_b = p.symbols.iter().any(|s| s.contains("b.ts"));
            let expected = if through_b { PathwayStatus::Broken } else { PathwayStatus::Valid };
            assert_eq!(now.status, expected, "pathway {}", p.id);
        }
    }

    #[test]
    fn unchanged_tree_is_a_no_op() {
        let dir = tree(&[("a.ts", EMITTER), ("b.ts", LISTENER)]);
        let store = GraphStore::new(":memory:").unwrap();
        let config = CodeTraceConfig::default();
        index_project(&store, dir.path(), &config, None).unwrap();
        let pathways = store.pathways(None).unwrap();

        let report = reindex(&store, dir.path(), &config, &ReindexOptions::default()).unwrap();
        assert!(report.changes.is_empty());
        assert_eq!(report.retraced_entries, 0);
        assert_eq!(store.pathways(None).unwrap(), pathways);
    }

    #[test]
    fn editing_a_constituent_file_marks_its_pathways_changed() {
        let dir = tree(&[
            ("a.ts", EMITTER),
            ("b.ts", LISTENER),
            (
                "c.ts",
                "export function health(req, res) {\n  res.json({ ok: true });\n}\napp.get('/health', health);\n",
            ),
        ]);
        let store = GraphStore::new(":memory:").unwrap();
        let config = CodeTraceConfig::default();
        index_project(&store, dir.path(), &config, None).unwrap();
        let before = store.pathways(Some(PathwayStatus::Valid)).unwrap();
        assert!(before.iter().any(|p| p.symbols.iter().any(|s| s.contains("b.ts"))));

        std::fs::write(
            dir.path().join("b.ts"),
            "export function onOrderCreated(o) {\n  audit(o);\n  db.insert(o);\n}\nbus.on('order.created', onOrderCreated);\n",
        )
        .unwrap();
        let report = reindex(&store, dir.path(), &config, &ReindexOptions::default()).unwrap();
        assert_eq!(report.changes, vec![FileChange::new("b.ts", ChangeKind::Modified)]);

        for p in &before {
            let now = store.get_pathway(&p.id).unwrap().unwrap();
            let through_b = p.symbols.iter().any(|s| s.contains("b.ts"));
            let expected = if through_b { PathwayStatus::Changed } else { PathwayStatus::Valid };
            assert_eq!(now.status, expected, "pathway {}", p.id);
        }
    }
}
