//! SQLite schema initialization for `graph.db`.
//!
//! Every derived table (pathways, coverage, validation issues) can be
//! rebuilt from `symbols`, `edges`, and the per-file side tables, so the
//! schema carries no independent source of truth beyond extraction output,
//! reviewer input (`resolutions`, `manual_designations`), and `metadata`.

use rusqlite::Connection;

// ---------------------------------------------------------------------------
// DDL constants
// ---------------------------------------------------------------------------

const CREATE_SYMBOLS: &str = "\
CREATE TABLE IF NOT EXISTS symbols (
  id TEXT PRIMARY KEY,
  kind TEXT NOT NULL,
  name TEXT NOT NULL,
  qualified_name TEXT NOT NULL,
  file_path TEXT NOT NULL,
  start_line INTEGER NOT NULL,
  end_line INTEGER NOT NULL,
  language TEXT NOT NULL,
  signature TEXT,
  exported INTEGER NOT NULL DEFAULT 0
)";

const CREATE_EDGES: &str = "\
CREATE TABLE IF NOT EXISTS edges (
  id TEXT PRIMARY KEY,
  source_symbol_id TEXT NOT NULL,
  target_symbol_id TEXT,
  kind TEXT NOT NULL,
  resolved INTEGER NOT NULL,
  key TEXT,
  source_file TEXT NOT NULL,
  source_line INTEGER NOT NULL,
  confidence REAL NOT NULL DEFAULT 1.0,
  origin TEXT NOT NULL,
  detail TEXT
)";

const CREATE_FILES: &str = "\
CREATE TABLE IF NOT EXISTS files (
  path TEXT PRIMARY KEY,
  language TEXT NOT NULL,
  content_hash TEXT NOT NULL,
  line_count INTEGER NOT NULL,
  parse_status TEXT NOT NULL,
  parse_error TEXT,
  indexed_at TEXT NOT NULL
)";

const CREATE_CALL_SITES: &str = "\
CREATE TABLE IF NOT EXISTS call_sites (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  owner_id TEXT NOT NULL,
  callee TEXT NOT NULL,
  receiver TEXT,
  file_path TEXT NOT NULL,
  line INTEGER NOT NULL
)";

const CREATE_IMPORT_REFS: &str = "\
CREATE TABLE IF NOT EXISTS import_refs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  symbol_id TEXT NOT NULL,
  file_path TEXT NOT NULL,
  specifier TEXT NOT NULL,
  names TEXT NOT NULL DEFAULT '[]',
  line INTEGER NOT NULL
)";

const CREATE_CANDIDATES: &str = "\
CREATE TABLE IF NOT EXISTS candidates (
  kind TEXT NOT NULL,
  key TEXT NOT NULL,
  side TEXT NOT NULL,
  symbol_id TEXT NOT NULL,
  file_path TEXT NOT NULL,
  line INTEGER NOT NULL,
  PRIMARY KEY (kind, key, side, symbol_id, line)
)";

const CREATE_RESOLUTIONS: &str = "\
CREATE TABLE IF NOT EXISTS resolutions (
  kind TEXT NOT NULL,
  key TEXT NOT NULL,
  source_symbol_id TEXT NOT NULL DEFAULT '',
  target_symbol_id TEXT NOT NULL,
  note TEXT,
  created_at TEXT NOT NULL,
  PRIMARY KEY (kind, key, source_symbol_id)
)";

const CREATE_ENTRY_POINTS: &str = "\
CREATE TABLE IF NOT EXISTS entry_points (
  id TEXT PRIMARY KEY,
  symbol_id TEXT NOT NULL,
  trigger_kind TEXT NOT NULL,
  origin TEXT NOT NULL,
  detail TEXT
)";

const CREATE_FINAL_OUTCOMES: &str = "\
CREATE TABLE IF NOT EXISTS final_outcomes (
  id TEXT PRIMARY KEY,
  symbol_id TEXT NOT NULL,
  effect_kind TEXT NOT NULL,
  origin TEXT NOT NULL,
  detail TEXT
)";

const CREATE_MANUAL_DESIGNATIONS: &str = "\
CREATE TABLE IF NOT EXISTS manual_designations (
  role TEXT NOT NULL,
  file_path TEXT NOT NULL,
  qualified_name TEXT NOT NULL,
  kind TEXT NOT NULL,
  PRIMARY KEY (role, file_path, qualified_name)
)";

const CREATE_PATHWAYS: &str = "\
CREATE TABLE IF NOT EXISTS pathways (
  id TEXT PRIMARY KEY,
  entry_point_id TEXT NOT NULL,
  outcome_id TEXT,
  status TEXT NOT NULL,
  termination TEXT NOT NULL
)";

const CREATE_PATHWAY_STEPS: &str = "\
CREATE TABLE IF NOT EXISTS pathway_steps (
  pathway_id TEXT NOT NULL,
  step_index INTEGER NOT NULL,
  edge_id TEXT NOT NULL,
  PRIMARY KEY (pathway_id, step_index)
)";

const CREATE_PATHWAY_SYMBOLS: &str = "\
CREATE TABLE IF NOT EXISTS pathway_symbols (
  pathway_id TEXT NOT NULL,
  position INTEGER NOT NULL,
  symbol_id TEXT NOT NULL,
  PRIMARY KEY (pathway_id, position)
)";

/// Every symbol visited while tracing an entry point, including branches
/// that ended in a cycle or hit a limit and so produced no pathway.
const CREATE_TRACE_REACH: &str = "\
CREATE TABLE IF NOT EXISTS trace_reach (
  entry_point_id TEXT NOT NULL,
  symbol_id TEXT NOT NULL,
  PRIMARY KEY (entry_point_id, symbol_id)
)";

const CREATE_COVERAGE: &str = "\
CREATE TABLE IF NOT EXISTS coverage (
  file TEXT PRIMARY KEY,
  source_lines INTEGER NOT NULL,
  analysis_lines INTEGER NOT NULL,
  required INTEGER NOT NULL,
  status TEXT NOT NULL
)";

/// `entry_point_id` is empty for graph-wide findings.
const CREATE_VALIDATION_ISSUES: &str = "\
CREATE TABLE IF NOT EXISTS validation_issues (
  kind TEXT NOT NULL,
  subject TEXT NOT NULL,
  detail TEXT NOT NULL,
  entry_point_id TEXT NOT NULL DEFAULT '',
  PRIMARY KEY (kind, subject, detail, entry_point_id)
)";

const CREATE_METADATA: &str = "\
CREATE TABLE IF NOT EXISTS metadata (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
)";

// Indexes ----------------------------------------------------------------

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_path)",
    "CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name)",
    "CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(kind)",
    "CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_symbol_id)",
    "CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_symbol_id)",
    "CREATE INDEX IF NOT EXISTS idx_edges_file ON edges(source_file)",
    "CREATE INDEX IF NOT EXISTS idx_edges_kind_key ON edges(kind, key)",
    "CREATE INDEX IF NOT EXISTS idx_call_sites_file ON call_sites(file_path)",
    "CREATE INDEX IF NOT EXISTS idx_call_sites_callee ON call_sites(callee)",
    "CREATE INDEX IF NOT EXISTS idx_import_refs_file ON import_refs(file_path)",
    "CREATE INDEX IF NOT EXISTS idx_candidates_file ON candidates(file_path)",
    "CREATE INDEX IF NOT EXISTS idx_entry_points_symbol ON entry_points(symbol_id)",
    "CREATE INDEX IF NOT EXISTS idx_final_outcomes_symbol ON final_outcomes(symbol_id)",
    "CREATE INDEX IF NOT EXISTS idx_pathways_entry ON pathways(entry_point_id)",
    "CREATE INDEX IF NOT EXISTS idx_pathway_symbols_symbol ON pathway_symbols(symbol_id)",
    "CREATE INDEX IF NOT EXISTS idx_trace_reach_symbol ON trace_reach(symbol_id)",
];

const ALL_TABLES: &[&str] = &[
    CREATE_SYMBOLS,
    CREATE_EDGES,
    CREATE_FILES,
    CREATE_CALL_SITES,
    CREATE_IMPORT_REFS,
    CREATE_CANDIDATES,
    CREATE_RESOLUTIONS,
    CREATE_ENTRY_POINTS,
    CREATE_FINAL_OUTCOMES,
    CREATE_MANUAL_DESIGNATIONS,
    CREATE_PATHWAYS,
    CREATE_PATHWAY_STEPS,
    CREATE_PATHWAY_SYMBOLS,
    CREATE_TRACE_REACH,
    CREATE_COVERAGE,
    CREATE_VALIDATION_ISSUES,
    CREATE_METADATA,
];

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Open (or create) the SQLite database at `db_path` and apply the schema.
///
/// The returned connection has WAL mode and synchronous NORMAL configured.
/// Foreign keys stay OFF: unresolved edges carry a NULL target and pathway
/// steps outlive the edges of a deleted file while they await review, so
/// referential rules are enforced in the store layer instead.
///
/// # Errors
///
/// Returns a `rusqlite::Error` if the database cannot be opened or any DDL
/// statement fails.
pub fn initialize_database(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;

    // -- Pragmas ----------------------------------------------------------
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "OFF")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    // -- Tables -----------------------------------------------------------
    for ddl in ALL_TABLES {
        conn.execute_batch(ddl)?;
    }

    // -- Indexes ----------------------------------------------------------
    for ddl in CREATE_INDEXES {
        conn.execute_batch(ddl)?;
    }

    Ok(conn)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: initialize an in-memory database and return the connection.
    fn setup() -> Connection {
        initialize_database(":memory:").expect("schema creation should succeed on :memory:")
    }

    /// Helper: query sqlite_master for a given type and name.
    fn object_exists(conn: &Connection, obj_type: &str, obj_name: &str) -> bool {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = ?1 AND name = ?2",
                rusqlite::params![obj_type, obj_name],
                |row| row.get(0),
            )
            .unwrap();
        count > 0
    }

    fn columns(conn: &Connection, table: &str) -> Vec<String> {
        conn.prepare(&format!("PRAGMA table_info({table})"))
            .unwrap()
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn all_tables_exist() {
        let conn = setup();
        for table in &[
            "symbols",
            "edges",
            "files",
            "call_sites",
            "import_refs",
            "candidates",
            "resolutions",
            "entry_points",
            "final_outcomes",
            "manual_designations",
            "pathways",
            "pathway_steps",
            "pathway_symbols",
            "trace_reach",
            "coverage",
            "validation_issues",
            "metadata",
        ] {
            assert!(
                object_exists(&conn, "table", table),
                "table '{table}' should exist"
            );
        }
    }

    #[test]
    fn indexes_exist() {
        let conn = setup();
        for idx in &[
            "idx_symbols_file",
            "idx_edges_source",
            "idx_edges_target",
            "idx_pathway_symbols_symbol",
            "idx_trace_reach_symbol",
        ] {
            assert!(
                object_exists(&conn, "index", idx),
                "index '{idx}' should exist"
            );
        }
    }

    #[test]
    fn schema_is_reapplicable() {
        let conn = setup();
        for ddl in ALL_TABLES {
            conn.execute_batch(ddl).unwrap();
        }
    }

    #[test]
    fn edges_table_matches_published_layout() {
        let conn = setup();
        let cols = columns(&conn, "edges");
        for col in &[
            "id",
            "source_symbol_id",
            "target_symbol_id",
            "kind",
            "resolved",
            "key",
            "source_file",
            "source_line",
        ] {
            assert!(cols.contains(&col.to_string()), "edges missing '{col}'");
        }
    }

    #[test]
    fn symbols_table_matches_published_layout() {
        let conn = setup();
        let cols = columns(&conn, "symbols");
        for col in &[
            "id",
            "kind",
            "name",
            "file_path",
            "start_line",
            "end_line",
            "signature",
            "exported",
        ] {
            assert!(cols.contains(&col.to_string()), "symbols missing '{col}'");
        }
    }

    #[test]
    fn unresolved_edge_accepts_null_target() {
        let conn = setup();
        conn.execute(
            "INSERT INTO edges (id, source_symbol_id, target_symbol_id, kind, resolved, key, source_file, source_line, origin)
             VALUES ('e1', 's', NULL, 'event', 0, 'order.created', 'a.ts', 3, 'probe')",
            [],
        )
        .unwrap();
        let target: Option<String> = conn
            .query_row("SELECT target_symbol_id FROM edges WHERE id = 'e1'", [], |r| r.get(0))
            .unwrap();
        assert!(target.is_none());
    }

    #[test]
    fn pragmas_are_set() {
        let conn = setup();

        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        // In-memory databases report "memory" instead of "wal".
        assert!(
            journal_mode == "wal" || journal_mode == "memory",
            "journal_mode should be 'wal' or 'memory', got '{journal_mode}'"
        );

        let fk: i64 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 0);

        let sync: i64 = conn
            .pragma_query_value(None, "synchronous", |row| row.get(0))
            .unwrap();
        assert_eq!(sync, 1, "synchronous should be NORMAL (1)");
    }
}
