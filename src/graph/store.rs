//! SQLite persistence layer for the code reference graph.
//!
//! All reads go through [`Connection::prepare_cached`]. All writes go
//! through [`GraphStore::write`], which is the single serialized writer:
//! it opens one `BEGIN IMMEDIATE` transaction per logical batch, retries
//! the whole batch when the database is busy, and never commits a partial
//! batch. Calls to `write` made from inside another `write` join the outer
//! transaction, so an incremental reindex can compose per-file replacements
//! into one atomic unit.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use crate::db::converters::{
    row_to_call_site, row_to_candidate, row_to_coverage, row_to_edge, row_to_entry_point,
    row_to_file_record, row_to_import_ref, row_to_issue, row_to_outcome, row_to_symbol,
    CALL_SITE_COLUMNS, CANDIDATE_COLUMNS, COVERAGE_COLUMNS, EDGE_COLUMNS, ENTRY_POINT_COLUMNS,
    FILE_COLUMNS, IMPORT_REF_COLUMNS, ISSUE_COLUMNS, OUTCOME_COLUMNS, SYMBOL_COLUMNS,
};
use crate::db::schema::initialize_database;
use crate::error::{CodeTraceError, Result};
use crate::types::{
    CallSite, ConnectionCandidate, CoverageRecord, DesignationOrigin, DesignationRole, Edge,
    EdgeKind, EntryPoint, FileGraph, FileRecord, FinalOutcome, ImportRef, ManualDesignation,
    Pathway, PathwayStatus, Resolution, Symbol, Termination, ValidationIssue,
};

// ---------------------------------------------------------------------------
// GraphStats
// ---------------------------------------------------------------------------

/// Aggregate row counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct GraphStats {
    pub files: usize,
    pub unparsed_files: usize,
    pub symbols: usize,
    pub edges: usize,
    pub unresolved_edges: usize,
    pub entry_points: usize,
    pub outcomes: usize,
    pub pathways: usize,
    pub issues: usize,
}

/// Metadata key holding the commit the index was last brought up to.
pub const LAST_REINDEX_COMMIT: &str = "last_reindex_commit";

// ---------------------------------------------------------------------------
// GraphStore
// ---------------------------------------------------------------------------

/// Typed wrapper around `graph.db`.
pub struct GraphStore {
    pub conn: Connection,
    busy_retries: u32,
    tx_depth: Cell<u32>,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("busy_retries", &self.busy_retries)
            .finish_non_exhaustive()
    }
}

/// Resets the nesting depth even if the batch closure panics.
struct DepthGuard<'a>(&'a Cell<u32>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(0);
    }
}

// ---------------------------------------------------------------------------
// SQL constants
// ---------------------------------------------------------------------------

const INSERT_SYMBOL_SQL: &str = "\
INSERT INTO symbols (id, kind, name, qualified_name, file_path, start_line, end_line, language, signature, exported)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

const INSERT_EDGE_SQL: &str = "\
INSERT OR REPLACE INTO edges (id, source_symbol_id, target_symbol_id, kind, resolved, key, source_file, source_line, confidence, origin, detail)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

const UPSERT_FILE_SQL: &str = "\
INSERT INTO files (path, language, content_hash, line_count, parse_status, parse_error, indexed_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(path) DO UPDATE SET
  language = excluded.language,
  content_hash = excluded.content_hash,
  line_count = excluded.line_count,
  parse_status = excluded.parse_status,
  parse_error = excluded.parse_error,
  indexed_at = excluded.indexed_at";

const INSERT_CALL_SITE_SQL: &str = "\
INSERT INTO call_sites (owner_id, callee, receiver, file_path, line) VALUES (?1, ?2, ?3, ?4, ?5)";

const INSERT_IMPORT_REF_SQL: &str = "\
INSERT INTO import_refs (symbol_id, file_path, specifier, names, line) VALUES (?1, ?2, ?3, ?4, ?5)";

const INSERT_CANDIDATE_SQL: &str = "\
INSERT OR IGNORE INTO candidates (kind, key, side, symbol_id, file_path, line) VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

const INSERT_ENTRY_POINT_SQL: &str = "\
INSERT INTO entry_points (id, symbol_id, trigger_kind, origin, detail) VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(id) DO UPDATE SET
  origin = CASE WHEN entry_points.origin = 'manual' THEN 'manual' ELSE excluded.origin END,
  detail = COALESCE(excluded.detail, entry_points.detail)";

const INSERT_OUTCOME_SQL: &str = "\
INSERT INTO final_outcomes (id, symbol_id, effect_kind, origin, detail) VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(id) DO UPDATE SET
  origin = CASE WHEN final_outcomes.origin = 'manual' THEN 'manual' ELSE excluded.origin END,
  detail = COALESCE(excluded.detail, final_outcomes.detail)";

const DELETE_DETECTED_ENTRIES_BY_FILE_SQL: &str = "\
DELETE FROM entry_points WHERE origin = 'detected'
  AND symbol_id IN (SELECT id FROM symbols WHERE file_path = ?1)";

const DELETE_DETECTED_OUTCOMES_BY_FILE_SQL: &str = "\
DELETE FROM final_outcomes WHERE origin = 'detected'
  AND symbol_id IN (SELECT id FROM symbols WHERE file_path = ?1)";

/// Per-file tables cleared before a file is re-inserted or removed.
const DELETE_BY_FILE_SQL: &[&str] = &[
    "DELETE FROM edges WHERE source_file = ?1",
    "DELETE FROM call_sites WHERE file_path = ?1",
    "DELETE FROM import_refs WHERE file_path = ?1",
    "DELETE FROM candidates WHERE file_path = ?1",
    "DELETE FROM symbols WHERE file_path = ?1",
];

/// Path columns rewritten by a rename; symbol ids stay untouched.
const RENAME_FILE_SQL: &[&str] = &[
    "UPDATE symbols SET file_path = ?2 WHERE file_path = ?1",
    "UPDATE edges SET source_file = ?2 WHERE source_file = ?1",
    "UPDATE call_sites SET file_path = ?2 WHERE file_path = ?1",
    "UPDATE import_refs SET file_path = ?2 WHERE file_path = ?1",
    "UPDATE candidates SET file_path = ?2 WHERE file_path = ?1",
    "UPDATE manual_designations SET file_path = ?2 WHERE file_path = ?1",
    "UPDATE files SET path = ?2 WHERE path = ?1",
    "DELETE FROM coverage WHERE file IN (?1, ?2)",
];

const INSERT_PATHWAY_SQL: &str = "\
INSERT OR REPLACE INTO pathways (id, entry_point_id, outcome_id, status, termination) VALUES (?1, ?2, ?3, ?4, ?5)";

const INSERT_RESOLUTION_SQL: &str = "\
INSERT OR REPLACE INTO resolutions (kind, key, source_symbol_id, target_symbol_id, note, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

// ---------------------------------------------------------------------------
// Implementation
// ---------------------------------------------------------------------------

impl GraphStore {
    /// Open (or create) the database at `db_path`, apply the schema, and
    /// return a ready-to-use store.
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = initialize_database(db_path)?;
        Ok(Self::from_connection(conn))
    }

    /// Open with explicit busy handling.
    pub fn open(db_path: &str, busy_retries: u32, busy_timeout_ms: u64) -> Result<Self> {
        let conn = initialize_database(db_path)?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
        let mut store = Self::from_connection(conn);
        store.busy_retries = busy_retries;
        Ok(store)
    }

    /// Wrap an already-open connection. Useful in tests where the caller
    /// has already called `initialize_database(":memory:")`.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            busy_retries: 5,
            tx_depth: Cell::new(0),
        }
    }

    // -------------------------------------------------------------------
    // Serialized writer
    // -------------------------------------------------------------------

    /// Run `batch` inside one immediate transaction and commit it.
    ///
    /// A busy/locked database rolls the attempt back and re-runs the whole
    /// batch, up to the configured retry count; after that the caller sees
    /// [`CodeTraceError::TransactionConflict`]. Any other error rolls back
    /// and propagates. Nested calls run inside the outer transaction.
    pub fn write<T, F>(&self, mut batch: F) -> Result<T>
    where
        F: FnMut(&Self) -> Result<T>,
    {
        if self.tx_depth.get() > 0 {
            return batch(self);
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.try_write(&mut batch) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_busy() && attempt <= self.busy_retries => {
                    let backoff = Duration::from_millis(20u64 << attempt.min(6));
                    tracing::warn!(attempt, backoff_ms = backoff.as_millis() as u64, "store busy, retrying batch");
                    std::thread::sleep(backoff);
                }
                Err(e) if e.is_busy() => {
                    return Err(CodeTraceError::TransactionConflict { attempts: attempt })
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_write<T, F>(&self, batch: &mut F) -> Result<T>
    where
        F: FnMut(&Self) -> Result<T>,
    {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let value = {
            self.tx_depth.set(1);
            let _guard = DepthGuard(&self.tx_depth);
            batch(self)?
        };
        tx.commit()?;
        Ok(value)
    }

    // -------------------------------------------------------------------
    // Per-file replacement
    // -------------------------------------------------------------------

    /// Atomically replace everything extracted from one file.
    ///
    /// Old rows go first, then symbols are inserted before anything that
    /// refers to them (call sites, imports, candidates, designations).
    ///
    /// A renamed file keeps ids minted under its old path, so a new file at
    /// that path can produce ids already owned elsewhere. Those get a `~n`
    /// suffix instead of overwriting the other file's rows.
    pub fn replace_file(&self, graph: &FileGraph) -> Result<()> {
        self.write(|store| {
            let path = graph.record.path.as_str();
            store.clear_file_rows(path)?;
            let remap = store.foreign_id_remap(graph)?;
            let remapped;
            let graph = if remap.is_empty() {
                graph
            } else {
                tracing::debug!(file = path, ids = remap.len(), "symbol ids owned by another file, suffixing");
                remapped = graph.with_symbol_ids(&remap);
                &remapped
            };

            {
                let mut stmt = store.conn.prepare_cached(INSERT_SYMBOL_SQL)?;
                for s in &graph.symbols {
                    stmt.execute(params![
                        s.id,
                        s.kind.as_str(),
                        s.name,
                        s.qualified_name,
                        s.file_path,
                        s.start_line,
                        s.end_line,
                        s.language.as_str(),
                        s.signature,
                        s.exported as i32,
                    ])?;
                }
            }
            {
                let mut stmt = store.conn.prepare_cached(INSERT_CALL_SITE_SQL)?;
                for c in &graph.call_sites {
                    stmt.execute(params![c.owner, c.callee, c.receiver, c.file_path, c.line])?;
                }
            }
            {
                let mut stmt = store.conn.prepare_cached(INSERT_IMPORT_REF_SQL)?;
                for i in &graph.imports {
                    let names = serde_json::to_string(&i.names)?;
                    stmt.execute(params![i.symbol_id, i.file_path, i.specifier, names, i.line])?;
                }
            }
            store.insert_candidates(&graph.candidates)?;
            for ep in &graph.entry_points {
                store.insert_entry_point(ep)?;
            }
            for fo in &graph.outcomes {
                store.insert_outcome(fo)?;
            }
            store.upsert_file(&graph.record)?;
            Ok(())
        })
    }

    /// Remove a file and everything extracted from it.
    pub fn delete_file(&self, path: &str) -> Result<()> {
        self.write(|store| {
            store.clear_file_rows(path)?;
            store.conn.execute("DELETE FROM files WHERE path = ?1", params![path])?;
            store.conn.execute("DELETE FROM coverage WHERE file = ?1", params![path])?;
            Ok(())
        })
    }

    /// Move a file's rows to `new_path` without changing any symbol id.
    pub fn rename_file(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.write(|store| {
            for sql in RENAME_FILE_SQL {
                store.conn.prepare_cached(sql)?.execute(params![old_path, new_path])?;
            }
            Ok(())
        })
    }

    /// New ids for symbols of `graph` whose id is already stored for a
    /// different file.
    fn foreign_id_remap(&self, graph: &FileGraph) -> Result<HashMap<String, String>> {
        let mut taken = self.conn.prepare_cached("SELECT 1 FROM symbols WHERE id = ?1")?;
        let own: HashSet<&str> = graph.symbols.iter().map(|s| s.id.as_str()).collect();
        let mut remap = HashMap::new();
        for s in &graph.symbols {
            if !taken.exists(params![s.id])? {
                continue;
            }
            let mut n = 2;
            let fresh = loop {
                let candidate = format!("{}~{n}", s.id);
                if !own.contains(candidate.as_str())
                    && !remap.values().any(|v: &String| *v == candidate)
                    && !taken.exists(params![candidate])?
                {
                    break candidate;
                }
                n += 1;
            };
            remap.insert(s.id.clone(), fresh);
        }
        Ok(remap)
    }

    fn clear_file_rows(&self, path: &str) -> Result<()> {
        self.conn
            .prepare_cached(DELETE_DETECTED_ENTRIES_BY_FILE_SQL)?
            .execute(params![path])?;
        self.conn
            .prepare_cached(DELETE_DETECTED_OUTCOMES_BY_FILE_SQL)?
            .execute(params![path])?;
        for sql in DELETE_BY_FILE_SQL {
            self.conn.prepare_cached(sql)?.execute(params![path])?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Files
    // -------------------------------------------------------------------

    pub fn upsert_file(&self, record: &FileRecord) -> Result<()> {
        self.conn.prepare_cached(UPSERT_FILE_SQL)?.execute(params![
            record.path,
            record.language.as_str(),
            record.content_hash,
            record.line_count,
            record.parse_status.as_str(),
            record.parse_error,
            Utc::now().to_rfc3339(),
        ])?;
        Ok(())
    }

    pub fn get_file(&self, path: &str) -> Result<Option<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE path = ?1");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        Ok(stmt.query_row(params![path], row_to_file_record).optional()?)
    }

    pub fn all_files(&self) -> Result<Vec<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files ORDER BY path");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], row_to_file_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Path to content hash for every indexed file.
    pub fn file_hashes(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT path, content_hash FROM files")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<HashMap<_, _>>>()?)
    }

    // -------------------------------------------------------------------
    // Symbols
    // -------------------------------------------------------------------

    pub fn get_symbol(&self, id: &str) -> Result<Option<Symbol>> {
        let sql = format!("SELECT {SYMBOL_COLUMNS} FROM symbols WHERE id = ?1");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        Ok(stmt.query_row(params![id], row_to_symbol).optional()?)
    }

    pub fn symbols_by_file(&self, path: &str) -> Result<Vec<Symbol>> {
        let sql = format!("SELECT {SYMBOL_COLUMNS} FROM symbols WHERE file_path = ?1 ORDER BY id");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![path], row_to_symbol)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn symbols_by_name(&self, name: &str) -> Result<Vec<Symbol>> {
        let sql = format!("SELECT {SYMBOL_COLUMNS} FROM symbols WHERE name = ?1 ORDER BY id");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![name], row_to_symbol)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Look a symbol up by its stable address rather than its id.
    pub fn find_symbol(&self, file_path: &str, qualified_name: &str) -> Result<Option<Symbol>> {
        let sql = format!(
            "SELECT {SYMBOL_COLUMNS} FROM symbols \
             WHERE file_path = ?1 AND qualified_name = ?2 AND kind != 'import' \
             ORDER BY id LIMIT 1"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        Ok(stmt
            .query_row(params![file_path, qualified_name], row_to_symbol)
            .optional()?)
    }

    pub fn all_symbols(&self) -> Result<Vec<Symbol>> {
        let sql = format!("SELECT {SYMBOL_COLUMNS} FROM symbols ORDER BY id");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], row_to_symbol)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn symbol_ids(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare_cached("SELECT id FROM symbols")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<HashSet<_>>>()?)
    }

    // -------------------------------------------------------------------
    // Edges
    // -------------------------------------------------------------------

    /// Insert edges, replacing any existing row with the same dedup id.
    pub fn insert_edges(&self, edges: &[Edge]) -> Result<()> {
        self.write(|store| {
            let mut stmt = store.conn.prepare_cached(INSERT_EDGE_SQL)?;
            for e in edges {
                stmt.execute(params![
                    e.id,
                    e.source,
                    e.target,
                    e.kind.as_str(),
                    e.resolved as i32,
                    e.key,
                    e.file_path,
                    e.line,
                    e.confidence,
                    e.origin.as_str(),
                    e.detail,
                ])?;
            }
            Ok(())
        })
    }

    pub fn get_edge(&self, id: &str) -> Result<Option<Edge>> {
        let sql = format!("SELECT {EDGE_COLUMNS} FROM edges WHERE id = ?1");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        Ok(stmt.query_row(params![id], row_to_edge).optional()?)
    }

    pub fn all_edges(&self) -> Result<Vec<Edge>> {
        let sql = format!("SELECT {EDGE_COLUMNS} FROM edges ORDER BY id");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], row_to_edge)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn edges_from(&self, symbol_id: &str) -> Result<Vec<Edge>> {
        let sql = format!("SELECT {EDGE_COLUMNS} FROM edges WHERE source_symbol_id = ?1 ORDER BY id");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![symbol_id], row_to_edge)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn edges_to(&self, symbol_id: &str) -> Result<Vec<Edge>> {
        let sql = format!("SELECT {EDGE_COLUMNS} FROM edges WHERE target_symbol_id = ?1 ORDER BY id");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![symbol_id], row_to_edge)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn unresolved_edges(&self) -> Result<Vec<Edge>> {
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM edges WHERE resolved = 0 ORDER BY source_file, source_line, id"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], row_to_edge)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn edges_by_kind_key(&self, kind: EdgeKind, key: &str) -> Result<Vec<Edge>> {
        let sql = format!("SELECT {EDGE_COLUMNS} FROM edges WHERE kind = ?1 AND key = ?2 ORDER BY id");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![kind.as_str(), key], row_to_edge)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn edge_ids(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare_cached("SELECT id FROM edges")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<HashSet<_>>>()?)
    }

    /// Drop call-resolution edges (`call` and `unknown`) owned by `files`
    /// or keyed by one of `callees`. `None` drops all of them.
    pub fn delete_call_edges(
        &self,
        scope: Option<(&HashSet<String>, &HashSet<String>)>,
    ) -> Result<usize> {
        self.write(|store| {
            let Some((files, callees)) = scope else {
                return Ok(store
                    .conn
                    .execute("DELETE FROM edges WHERE kind IN ('call', 'unknown')", [])?);
            };
            let mut removed = 0;
            let mut by_file = store.conn.prepare_cached(
                "DELETE FROM edges WHERE kind IN ('call', 'unknown') AND source_file = ?1",
            )?;
            for f in files {
                removed += by_file.execute(params![f])?;
            }
            let mut by_key = store
                .conn
                .prepare_cached("DELETE FROM edges WHERE kind IN ('call', 'unknown') AND key = ?1")?;
            for c in callees {
                removed += by_key.execute(params![c])?;
            }
            Ok(removed)
        })
    }

    /// Drop import edges whose source is one of `import_symbols`. `None`
    /// drops all import edges.
    pub fn delete_import_edges(&self, import_symbols: Option<&HashSet<String>>) -> Result<usize> {
        self.write(|store| match import_symbols {
            None => Ok(store.conn.execute("DELETE FROM edges WHERE kind = 'import'", [])?),
            Some(ids) => {
                let mut stmt = store.conn.prepare_cached(
                    "DELETE FROM edges WHERE kind = 'import' AND source_symbol_id = ?1",
                )?;
                let mut removed = 0;
                for id in ids {
                    removed += stmt.execute(params![id])?;
                }
                Ok(removed)
            }
        })
    }

    /// Drop connection edges for the given `(kind, key)` groups. `None`
    /// drops every connection edge.
    pub fn delete_connection_edges(&self, keys: Option<&HashSet<(EdgeKind, String)>>) -> Result<usize> {
        self.write(|store| match keys {
            None => {
                let kinds: Vec<String> = EdgeKind::CONNECTION_KINDS
                    .iter()
                    .map(|k| format!("'{}'", k.as_str()))
                    .collect();
                let sql = format!("DELETE FROM edges WHERE kind IN ({})", kinds.join(", "));
                Ok(store.conn.execute(&sql, [])?)
            }
            Some(keys) => {
                let mut stmt = store
                    .conn
                    .prepare_cached("DELETE FROM edges WHERE kind = ?1 AND key = ?2")?;
                let mut removed = 0;
                for (kind, key) in keys {
                    removed += stmt.execute(params![kind.as_str(), key])?;
                }
                Ok(removed)
            }
        })
    }

    // -------------------------------------------------------------------
    // Call sites / imports / candidates
    // -------------------------------------------------------------------

    pub fn all_call_sites(&self) -> Result<Vec<CallSite>> {
        let sql = format!("SELECT {CALL_SITE_COLUMNS} FROM call_sites ORDER BY file_path, line, id");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], row_to_call_site)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Call sites in `files` or naming one of `callees`, deduplicated.
    pub fn call_sites_for(
        &self,
        files: &HashSet<String>,
        callees: &HashSet<String>,
    ) -> Result<Vec<CallSite>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let by_file = format!("SELECT id, {CALL_SITE_COLUMNS} FROM call_sites WHERE file_path = ?1");
        let by_callee = format!("SELECT id, {CALL_SITE_COLUMNS} FROM call_sites WHERE callee = ?1");
        for (sql, values) in [(by_file, files), (by_callee, callees)] {
            let mut stmt = self.conn.prepare_cached(&sql)?;
            for v in values {
                let rows = stmt.query_map(params![v], |row| {
                    let id: i64 = row.get(0)?;
                    Ok((
                        id,
                        CallSite {
                            owner: row.get(1)?,
                            callee: row.get(2)?,
                            receiver: row.get(3)?,
                            file_path: row.get(4)?,
                            line: row.get(5)?,
                        },
                    ))
                })?;
                for row in rows {
                    let (id, site) = row?;
                    if seen.insert(id) {
                        out.push(site);
                    }
                }
            }
        }
        out.sort_by(|a, b| (&a.file_path, a.line, &a.callee).cmp(&(&b.file_path, b.line, &b.callee)));
        Ok(out)
    }

    pub fn all_import_refs(&self) -> Result<Vec<ImportRef>> {
        let sql = format!("SELECT {IMPORT_REF_COLUMNS} FROM import_refs ORDER BY file_path, line, id");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], row_to_import_ref)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn insert_candidates(&self, candidates: &[ConnectionCandidate]) -> Result<()> {
        self.write(|store| {
            let mut stmt = store.conn.prepare_cached(INSERT_CANDIDATE_SQL)?;
            for c in candidates {
                stmt.execute(params![
                    c.kind.as_str(),
                    c.key,
                    c.side.as_str(),
                    c.symbol_id,
                    c.file_path,
                    c.line,
                ])?;
            }
            Ok(())
        })
    }

    pub fn all_candidates(&self) -> Result<Vec<ConnectionCandidate>> {
        let sql = format!("SELECT {CANDIDATE_COLUMNS} FROM candidates ORDER BY kind, key, side, symbol_id, line");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], row_to_candidate)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn candidates_for_key(&self, kind: EdgeKind, key: &str) -> Result<Vec<ConnectionCandidate>> {
        let sql = format!(
            "SELECT {CANDIDATE_COLUMNS} FROM candidates WHERE kind = ?1 AND key = ?2 \
             ORDER BY side, symbol_id, line"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![kind.as_str(), key], row_to_candidate)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn candidate_keys_for_file(&self, path: &str) -> Result<HashSet<(EdgeKind, String)>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT DISTINCT kind, key FROM candidates WHERE file_path = ?1")?;
        let rows = stmt.query_map(params![path], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut keys = HashSet::new();
        for row in rows {
            let (kind, key) = row?;
            if let Some(kind) = EdgeKind::from_str_loose(&kind) {
                keys.insert((kind, key));
            }
        }
        Ok(keys)
    }

    // -------------------------------------------------------------------
    // Resolutions
    // -------------------------------------------------------------------

    pub fn add_resolution(&self, resolution: &Resolution) -> Result<()> {
        self.write(|store| {
            store.conn.prepare_cached(INSERT_RESOLUTION_SQL)?.execute(params![
                resolution.kind.as_str(),
                resolution.key,
                resolution.source.as_deref().unwrap_or(""),
                resolution.target,
                resolution.note,
                Utc::now().to_rfc3339(),
            ])?;
            Ok(())
        })
    }

    pub fn resolutions(&self) -> Result<Vec<Resolution>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT kind, key, source_symbol_id, target_symbol_id, note FROM resolutions ORDER BY kind, key, source_symbol_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let kind: String = row.get(0)?;
            let source: String = row.get(2)?;
            Ok((kind, row.get(1)?, source, row.get(3)?, row.get(4)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (kind, key, source, target, note) = row?;
            let Some(kind) = EdgeKind::from_str_loose(&kind) else {
                continue;
            };
            out.push(Resolution {
                kind,
                key,
                source: (!source.is_empty()).then_some(source),
                target,
                note,
            });
        }
        Ok(out)
    }

    // -------------------------------------------------------------------
    // Entry points / outcomes / manual designations
    // -------------------------------------------------------------------

    pub fn insert_entry_point(&self, ep: &EntryPoint) -> Result<()> {
        self.conn.prepare_cached(INSERT_ENTRY_POINT_SQL)?.execute(params![
            ep.id,
            ep.symbol_id,
            ep.trigger.as_str(),
            ep.origin.as_str(),
            ep.detail,
        ])?;
        Ok(())
    }

    pub fn insert_outcome(&self, fo: &FinalOutcome) -> Result<()> {
        self.conn.prepare_cached(INSERT_OUTCOME_SQL)?.execute(params![
            fo.id,
            fo.symbol_id,
            fo.effect.as_str(),
            fo.origin.as_str(),
            fo.detail,
        ])?;
        Ok(())
    }

    pub fn entry_points(&self) -> Result<Vec<EntryPoint>> {
        let sql = format!("SELECT {ENTRY_POINT_COLUMNS} FROM entry_points ORDER BY id");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], row_to_entry_point)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn outcomes(&self) -> Result<Vec<FinalOutcome>> {
        let sql = format!("SELECT {OUTCOME_COLUMNS} FROM final_outcomes ORDER BY id");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], row_to_outcome)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Remove manual entry points and outcomes so they can be re-applied
    /// against the current symbol set.
    pub fn clear_manual_designated(&self) -> Result<()> {
        self.write(|store| {
            store
                .conn
                .execute("DELETE FROM entry_points WHERE origin = ?1", params![DesignationOrigin::Manual.as_str()])?;
            store
                .conn
                .execute("DELETE FROM final_outcomes WHERE origin = ?1", params![DesignationOrigin::Manual.as_str()])?;
            Ok(())
        })
    }

    pub fn add_manual_designation(&self, d: &ManualDesignation) -> Result<()> {
        self.write(|store| {
            store.conn.execute(
                "INSERT OR REPLACE INTO manual_designations (role, file_path, qualified_name, kind) VALUES (?1, ?2, ?3, ?4)",
                params![d.role.as_str(), d.file_path, d.qualified_name, d.kind],
            )?;
            Ok(())
        })
    }

    pub fn manual_designations(&self) -> Result<Vec<ManualDesignation>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT role, file_path, qualified_name, kind FROM manual_designations ORDER BY role, file_path, qualified_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (role, file_path, qualified_name, kind) = row?;
            if let Some(role) = DesignationRole::from_str_loose(&role) {
                out.push(ManualDesignation {
                    role,
                    file_path,
                    qualified_name,
                    kind,
                });
            }
        }
        Ok(out)
    }

    // -------------------------------------------------------------------
    // Pathways
    // -------------------------------------------------------------------

    /// Insert or overwrite a pathway with its steps and symbol membership.
    pub fn insert_pathway(&self, p: &Pathway) -> Result<()> {
        self.write(|store| {
            store.delete_pathway_rows(&p.id)?;
            store.conn.prepare_cached(INSERT_PATHWAY_SQL)?.execute(params![
                p.id,
                p.entry_point_id,
                p.outcome_id,
                p.status.as_str(),
                p.termination.as_str(),
            ])?;
            let mut steps = store.conn.prepare_cached(
                "INSERT INTO pathway_steps (pathway_id, step_index, edge_id) VALUES (?1, ?2, ?3)",
            )?;
            for (i, edge_id) in p.steps.iter().enumerate() {
                steps.execute(params![p.id, i as i64, edge_id])?;
            }
            let mut symbols = store.conn.prepare_cached(
                "INSERT INTO pathway_symbols (pathway_id, position, symbol_id) VALUES (?1, ?2, ?3)",
            )?;
            for (i, symbol_id) in p.symbols.iter().enumerate() {
                symbols.execute(params![p.id, i as i64, symbol_id])?;
            }
            Ok(())
        })
    }

    pub fn delete_pathway(&self, id: &str) -> Result<bool> {
        self.write(|store| store.delete_pathway_rows(id))
    }

    fn delete_pathway_rows(&self, id: &str) -> Result<bool> {
        self.conn
            .prepare_cached("DELETE FROM pathway_steps WHERE pathway_id = ?1")?
            .execute(params![id])?;
        self.conn
            .prepare_cached("DELETE FROM pathway_symbols WHERE pathway_id = ?1")?
            .execute(params![id])?;
        let n = self
            .conn
            .prepare_cached("DELETE FROM pathways WHERE id = ?1")?
            .execute(params![id])?;
        Ok(n > 0)
    }

    pub fn set_pathway_status(&self, id: &str, status: PathwayStatus) -> Result<bool> {
        self.write(|store| {
            let n = store
                .conn
                .prepare_cached("UPDATE pathways SET status = ?2 WHERE id = ?1")?
                .execute(params![id, status.as_str()])?;
            Ok(n > 0)
        })
    }

    pub fn get_pathway(&self, id: &str) -> Result<Option<Pathway>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, entry_point_id, outcome_id, status, termination FROM pathways WHERE id = ?1",
        )?;
        let head = stmt.query_row(params![id], pathway_head).optional()?;
        match head {
            Some(head) => Ok(Some(self.hydrate_pathway(head)?)),
            None => Ok(None),
        }
    }

    /// All pathways, optionally filtered by status, with steps loaded.
    pub fn pathways(&self, status: Option<PathwayStatus>) -> Result<Vec<Pathway>> {
        let heads = {
            let mut stmt = self.conn.prepare_cached(
                "SELECT id, entry_point_id, outcome_id, status, termination FROM pathways \
                 WHERE ?1 IS NULL OR status = ?1 ORDER BY entry_point_id, id",
            )?;
            let rows = stmt.query_map(params![status.map(|s| s.as_str())], pathway_head)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        heads.into_iter().map(|h| self.hydrate_pathway(h)).collect()
    }

    pub fn pathways_for_entry(&self, entry_point_id: &str) -> Result<Vec<Pathway>> {
        let heads = {
            let mut stmt = self.conn.prepare_cached(
                "SELECT id, entry_point_id, outcome_id, status, termination FROM pathways \
                 WHERE entry_point_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![entry_point_id], pathway_head)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        heads.into_iter().map(|h| self.hydrate_pathway(h)).collect()
    }

    fn hydrate_pathway(&self, mut p: Pathway) -> Result<Pathway> {
        let mut steps = self.conn.prepare_cached(
            "SELECT edge_id FROM pathway_steps WHERE pathway_id = ?1 ORDER BY step_index",
        )?;
        p.steps = steps
            .query_map(params![p.id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        let mut symbols = self.conn.prepare_cached(
            "SELECT symbol_id FROM pathway_symbols WHERE pathway_id = ?1 ORDER BY position",
        )?;
        p.symbols = symbols
            .query_map(params![p.id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(p)
    }

    /// Ids of pathways whose membership includes any of `symbols`.
    pub fn pathways_touching(&self, symbols: &HashSet<String>) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT DISTINCT pathway_id FROM pathway_symbols WHERE symbol_id = ?1")?;
        let mut out = HashSet::new();
        for s in symbols {
            for row in stmt.query_map(params![s], |row| row.get::<_, String>(0))? {
                out.insert(row?);
            }
        }
        Ok(out)
    }

    /// Entry points whose last trace visited any of `symbols`.
    pub fn entries_reaching(&self, symbols: &HashSet<String>) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT DISTINCT entry_point_id FROM trace_reach WHERE symbol_id = ?1")?;
        let mut out = HashSet::new();
        for s in symbols {
            for row in stmt.query_map(params![s], |row| row.get::<_, String>(0))? {
                out.insert(row?);
            }
        }
        Ok(out)
    }

    /// Replace the reach set and per-entry issues recorded for one entry.
    pub fn replace_trace_record(
        &self,
        entry_point_id: &str,
        reach: &HashSet<String>,
        issues: &[ValidationIssue],
    ) -> Result<()> {
        self.write(|store| {
            store
                .conn
                .prepare_cached("DELETE FROM trace_reach WHERE entry_point_id = ?1")?
                .execute(params![entry_point_id])?;
            store
                .conn
                .prepare_cached("DELETE FROM validation_issues WHERE entry_point_id = ?1")?
                .execute(params![entry_point_id])?;
            let mut ins = store.conn.prepare_cached(
                "INSERT OR IGNORE INTO trace_reach (entry_point_id, symbol_id) VALUES (?1, ?2)",
            )?;
            for s in reach {
                ins.execute(params![entry_point_id, s])?;
            }
            store.insert_issues(issues, entry_point_id)?;
            Ok(())
        })
    }

    /// Drop trace bookkeeping for entry points that no longer exist.
    pub fn prune_trace_records(&self, live_entries: &HashSet<String>) -> Result<usize> {
        self.write(|store| {
            let recorded: Vec<String> = {
                let mut stmt = store.conn.prepare_cached(
                    "SELECT DISTINCT entry_point_id FROM trace_reach \
                     UNION SELECT DISTINCT entry_point_id FROM validation_issues WHERE entry_point_id != ''",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            let mut pruned = 0;
            for id in recorded.iter().filter(|id| !live_entries.contains(*id)) {
                store.replace_trace_record(id, &HashSet::new(), &[])?;
                pruned += 1;
            }
            Ok(pruned)
        })
    }

    // -------------------------------------------------------------------
    // Validation issues
    // -------------------------------------------------------------------

    fn insert_issues(&self, issues: &[ValidationIssue], entry_point_id: &str) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR IGNORE INTO validation_issues (kind, subject, detail, entry_point_id) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for i in issues {
            stmt.execute(params![i.kind.as_str(), i.subject, i.detail, entry_point_id])?;
        }
        Ok(())
    }

    /// Replace graph-wide issues (those not tied to one entry's trace).
    pub fn replace_graph_issues(&self, issues: &[ValidationIssue]) -> Result<()> {
        self.write(|store| {
            store
                .conn
                .execute("DELETE FROM validation_issues WHERE entry_point_id = ''", [])?;
            store.insert_issues(issues, "")
        })
    }

    pub fn issues(&self) -> Result<Vec<ValidationIssue>> {
        let sql = format!(
            "SELECT DISTINCT {ISSUE_COLUMNS} FROM validation_issues ORDER BY kind, subject, detail"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], row_to_issue)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -------------------------------------------------------------------
    // Coverage
    // -------------------------------------------------------------------

    pub fn replace_coverage(&self, records: &[CoverageRecord]) -> Result<()> {
        self.write(|store| {
            store.conn.execute("DELETE FROM coverage", [])?;
            let mut stmt = store.conn.prepare_cached(
                "INSERT INTO coverage (file, source_lines, analysis_lines, required, status) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.file_path,
                    r.source_lines,
                    r.analysis_lines,
                    r.required,
                    r.status.as_str(),
                ])?;
            }
            Ok(())
        })
    }

    pub fn coverage(&self) -> Result<Vec<CoverageRecord>> {
        let sql = format!("SELECT {COVERAGE_COLUMNS} FROM coverage ORDER BY file");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], row_to_coverage)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT value FROM metadata WHERE key = ?1")?;
        Ok(stmt.query_row(params![key], |row| row.get(0)).optional()?)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.write(|store| {
            store.conn.execute(
                "INSERT INTO metadata (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }

    // -------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------

    fn count(&self, sql: &str) -> Result<usize> {
        let n: i64 = self.conn.prepare_cached(sql)?.query_row([], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn get_stats(&self) -> Result<GraphStats> {
        Ok(GraphStats {
            files: self.count("SELECT COUNT(*) FROM files")?,
            unparsed_files: self.count("SELECT COUNT(*) FROM files WHERE parse_status = 'unparsed'")?,
            symbols: self.count("SELECT COUNT(*) FROM symbols")?,
            edges: self.count("SELECT COUNT(*) FROM edges")?,
            unresolved_edges: self.count("SELECT COUNT(*) FROM edges WHERE resolved = 0")?,
            entry_points: self.count("SELECT COUNT(*) FROM entry_points")?,
            outcomes: self.count("SELECT COUNT(*) FROM final_outcomes")?,
            pathways: self.count("SELECT COUNT(*) FROM pathways")?,
            issues: self.count("SELECT COUNT(DISTINCT kind || subject || detail) FROM validation_issues")?,
        })
    }
}

fn pathway_head(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pathway> {
    let status: String = row.get(3)?;
    let termination: String = row.get(4)?;
    Ok(Pathway {
        id: row.get(0)?,
        entry_point_id: row.get(1)?,
        outcome_id: row.get(2)?,
        status: PathwayStatus::from_str_loose(&status).unwrap_or(PathwayStatus::Changed),
        termination: Termination::from_str_loose(&termination).unwrap_or(Termination::DeadEnd),
        steps: Vec::new(),
        symbols: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
