//! Full index orchestration.
//!
//! 1. Walk the tree ([`walk_sources`]).
//! 2. Analyze files in parallel: decode, parse, extract, probe. A file that
//!    fails any step becomes an `unparsed` [`FileGraph`]; it never aborts
//!    the run.
//! 3. Write back in batches of `index.batch_size`, one transaction each.
//! 4. Rebuild the derived graph: relink, merge, designate, trace,
//!    validate, audit coverage.
//!
//! Analysis units share nothing, so an interrupted run is resumed by
//! running it again.

use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

use indicatif::ProgressBar;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::audit::coverage::compute_coverage;
use crate::config::schema::CodeTraceConfig;
use crate::error::Result;
use crate::git;
use crate::graph::designate::apply_manual_designations;
use crate::graph::store::{GraphStore, LAST_REINDEX_COMMIT};
use crate::graph::tracer::{retire_dead_entries, retrace, validate};
use crate::indexer::extractor::extract;
use crate::indexer::parser::{decode_source, parse_checked, CodeParser};
use crate::indexer::walker::{walk_sources, SourceFile};
use crate::observability::IndexMetrics;
use crate::probe::merge::remerge;
use crate::probe::prober::probe_file;
use crate::resolution::relink;
use crate::types::{content_hash, FileGraph, FileRecord, Language, ParseStatus, PathwayStatus};

// ---------------------------------------------------------------------------
// Per-file analysis
// ---------------------------------------------------------------------------

/// Number of lines in raw bytes; a final line without `\n` still counts.
pub fn count_lines(bytes: &[u8]) -> u32 {
    let newlines = bytes.iter().filter(|b| **b == b'\n').count();
    let trailing = usize::from(!bytes.is_empty() && bytes.last() != Some(&b'\n'));
    (newlines + trailing) as u32
}

/// Extract and probe one file from its bytes. Pure: the same bytes always
/// produce the same graph.
pub fn analyze_bytes(path: &str, language: Language, bytes: &[u8], config: &CodeTraceConfig) -> FileGraph {
    let hash = content_hash(bytes);
    let lines = count_lines(bytes);
    if bytes.len() as u64 > config.index.max_file_bytes {
        return FileGraph::unparsed(
            path,
            language,
            hash,
            lines,
            format!("file is {} bytes, limit is {}", bytes.len(), config.index.max_file_bytes),
        );
    }

    let analyzed = decode_source(path, bytes).and_then(|source| {
        let tree = parse_checked(&CodeParser::new(), path, source, language, config.index.max_error_ratio)?;
        let extraction = extract(path, source, language, &tree)?;
        let probed = probe_file(path, source, language, &extraction, &config.probe);
        Ok((extraction, probed))
    });

    match analyzed {
        Ok((extraction, probed)) => FileGraph {
            record: FileRecord {
                path: path.to_string(),
                language,
                content_hash: hash,
                line_count: lines,
                parse_status: ParseStatus::Parsed,
                parse_error: None,
            },
            symbols: extraction.symbols,
            call_sites: extraction.call_sites,
            imports: extraction.imports,
            candidates: probed.candidates,
            entry_points: probed.entry_points,
            outcomes: probed.outcomes,
        },
        Err(e) => {
            warn!(file = path, error = %e, "recording file as unparsed");
            FileGraph::unparsed(path, language, hash, lines, e.to_string())
        }
    }
}

/// Read and analyze one walked file.
pub fn analyze_file(file: &SourceFile, config: &CodeTraceConfig) -> FileGraph {
    match std::fs::read(&file.abs_path) {
        Ok(bytes) => analyze_bytes(&file.path, file.language, &bytes, config),
        Err(e) => {
            warn!(file = %file.path, error = %e, "unreadable file");
            FileGraph::unparsed(&file.path, file.language, String::new(), 0, format!("read failed: {e}"))
        }
    }
}

// ---------------------------------------------------------------------------
// Batched write-back
// ---------------------------------------------------------------------------

/// Analyze `files` in parallel and commit them `batch_size` at a time.
pub fn index_files(
    store: &GraphStore,
    files: &[SourceFile],
    config: &CodeTraceConfig,
    metrics: &mut IndexMetrics,
    progress: Option<&ProgressBar>,
) -> Result<()> {
    for batch in files.chunks(config.index.batch_size.max(1)) {
        let graphs: Vec<FileGraph> = batch.par_iter().map(|f| analyze_file(f, config)).collect();
        store.write(|store| {
            for g in &graphs {
                store.replace_file(g)?;
            }
            Ok(())
        })?;
        for g in &graphs {
            metrics.files_indexed += 1;
            if g.record.parse_status == ParseStatus::Unparsed {
                metrics.files_unparsed += 1;
            }
            metrics.symbols += g.symbols.len();
            metrics.call_sites += g.call_sites.len();
            metrics.candidates += g.candidates.len();
        }
        if let Some(bar) = progress {
            bar.inc(batch.len() as u64);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Full index
// ---------------------------------------------------------------------------

/// Index the whole tree under `root` and rebuild every derived table.
pub fn index_project(
    store: &GraphStore,
    root: &Path,
    config: &CodeTraceConfig,
    progress: Option<&ProgressBar>,
) -> Result<IndexMetrics> {
    let started = Instant::now();
    let mut metrics = IndexMetrics::new();

    let files = walk_sources(root, &config.index)?;
    metrics.files_seen = files.len();
    if let Some(bar) = progress {
        bar.set_length(files.len() as u64);
    }

    let present: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();
    let stale: Vec<String> = store
        .all_files()?
        .into_iter()
        .map(|f| f.path)
        .filter(|p| !present.contains(p.as_str()))
        .collect();
    store.write(|store| {
        for path in &stale {
            store.delete_file(path)?;
        }
        Ok(())
    })?;
    metrics.files_deleted = stale.len();

    index_files(store, &files, config, &mut metrics, progress)?;
    rebuild_derived(store, root, config, &mut metrics)?;

    if git::is_repo(root) {
        match git::head_commit(root) {
            Ok(head) => store.set_meta(LAST_REINDEX_COMMIT, &head)?,
            Err(e) => warn!(error = %e, "could not read HEAD; last_reindex_commit not updated"),
        }
    }

    metrics.set_duration(started.elapsed());
    metrics.log("index");
    Ok(metrics)
}

/// Relink, merge, designate, trace, validate, and audit over the whole
/// graph.
pub fn rebuild_derived(
    store: &GraphStore,
    root: &Path,
    config: &CodeTraceConfig,
    metrics: &mut IndexMetrics,
) -> Result<()> {
    relink(store, &config.resolution, None)?;
    remerge(store, None)?;
    apply_manual_designations(store)?;
    metrics.pathways_broken += retire_dead_entries(store)?;
    let traced = retrace(store, &config.trace, None, None, PathwayStatus::Valid)?;
    metrics.pathways_broken += traced.broken;
    metrics.pathways_changed += traced.changed;
    metrics.issues = validate(store)?.len();
    compute_coverage(store, root, &config.coverage)?;

    let stats = store.get_stats()?;
    metrics.edges_unresolved = stats.unresolved_edges;
    metrics.edges_resolved = stats.edges - stats.unresolved_edges;
    metrics.pathways = stats.pathways;
    info!(
        symbols = stats.symbols,
        edges = stats.edges,
        entry_points = stats.entry_points,
        outcomes = stats.outcomes,
        "graph rebuilt"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EdgeKind;
    use test_case::test_case;

    #[test_case(b"", 0 ; "empty")]
    #[test_case(b"a", 1 ; "no newline")]
    #[test_case(b"a\n", 1 ; "one line")]
    #[test_case(b"a\nb", 2 ; "trailing partial")]
    #[test_case(b"\n\n", 2 ; "blank lines")]
    fn line_counting(bytes: &[u8], expected: u32) {
        assert_eq!(count_lines(bytes), expected);
    }

    #[test]
    fn invalid_utf8_is_unparsed() {
        let g = analyze_bytes("bad.py", Language::Python, &[0x66, 0xff, 0xfe, 0x0a], &CodeTraceConfig::default());
        assert_eq!(g.record.parse_status, ParseStatus::Unparsed);
        assert!(g.symbols.is_empty());
        assert_eq!(g.record.line_count, 1);
        assert!(g.record.parse_error.unwrap().contains("UTF-8"));
    }

    #[test]
    fn oversized_file_is_unparsed() {
        let mut config = CodeTraceConfig::default();
        config.index.max_file_bytes = 4;
        let g = analyze_bytes("a.ts", Language::TypeScript, b"const a = 1;\n", &config);
        assert_eq!(g.record.parse_status, ParseStatus::Unparsed);
    }

    #[test]
    fn analysis_includes_probe_output() {
        let src = b"export function createOrder(bus) {\n  bus.emit('order.created', {});\n}\n";
        let g = analyze_bytes("a.ts", Language::TypeScript, src, &CodeTraceConfig::default());
        assert_eq!(g.record.parse_status, ParseStatus::Parsed);
        assert_eq!(g.candidates.len(), 1);
        assert_eq!(g.candidates[0].kind, EdgeKind::Event);
    }

    #[test]
    fn index_project_builds_pathways() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.ts"),
            "export function createOrder(bus) {\n  bus.emit('order.created', {});\n}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.ts"),
            "export function onOrderCreated(o) {\n  db.orders.insert(o);\n}\nbus.on('order.created', onOrderCreated);\n",
        )
        .unwrap();

        let store = GraphStore::new(":memory:").unwrap();
        let metrics = index_project(&store, dir.path(), &CodeTraceConfig::default(), None).unwrap();
        assert_eq!(metrics.files_indexed, 2);
        assert_eq!(metrics.files_unparsed, 0);

        let events = store.edges_by_kind_key(EdgeKind::Event, "order.created").unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].resolved);
        assert_eq!(store.coverage().unwrap().len(), 2);
    }
}
