//! Row-to-domain conversions.
//!
//! Each `*_COLUMNS` constant lists the column order its converter expects,
//! so queries select `{COLUMNS}` and hand the row straight over.

use rusqlite::types::Type;
use rusqlite::Row;

use crate::types::{
    CallSite, CandidateSide, ConnectionCandidate, CoverageRecord, CoverageStatus,
    DesignationOrigin, Edge, EdgeKind, EdgeOrigin, EffectKind, EntryPoint, FileRecord,
    FinalOutcome, ImportRef, IssueKind, Language, ParseStatus, Symbol, SymbolKind, TriggerKind,
    ValidationIssue,
};

pub const SYMBOL_COLUMNS: &str =
    "id, kind, name, qualified_name, file_path, start_line, end_line, language, signature, exported";

pub const EDGE_COLUMNS: &str = "id, source_symbol_id, target_symbol_id, kind, resolved, key, \
     source_file, source_line, confidence, origin, detail";

pub const FILE_COLUMNS: &str =
    "path, language, content_hash, line_count, parse_status, parse_error";

pub const ENTRY_POINT_COLUMNS: &str = "id, symbol_id, trigger_kind, origin, detail";

pub const OUTCOME_COLUMNS: &str = "id, symbol_id, effect_kind, origin, detail";

pub const COVERAGE_COLUMNS: &str = "file, source_lines, analysis_lines, required, status";

pub const ISSUE_COLUMNS: &str = "kind, subject, detail";

pub const CANDIDATE_COLUMNS: &str = "kind, key, side, symbol_id, file_path, line";

pub const CALL_SITE_COLUMNS: &str = "owner_id, callee, receiver, file_path, line";

pub const IMPORT_REF_COLUMNS: &str = "symbol_id, file_path, specifier, names, line";

/// Decode a stored enum string, reporting the column on failure.
fn decode<T>(idx: usize, raw: String, parse: impl Fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unrecognised value `{raw}`").into(),
        )
    })
}

pub fn row_to_symbol(row: &Row<'_>) -> rusqlite::Result<Symbol> {
    Ok(Symbol {
        id: row.get(0)?,
        kind: decode(1, row.get(1)?, SymbolKind::from_str_loose)?,
        name: row.get(2)?,
        qualified_name: row.get(3)?,
        file_path: row.get(4)?,
        start_line: row.get(5)?,
        end_line: row.get(6)?,
        language: decode(7, row.get(7)?, Language::from_str_loose)?,
        signature: row.get(8)?,
        exported: row.get::<_, i64>(9)? != 0,
    })
}

pub fn row_to_edge(row: &Row<'_>) -> rusqlite::Result<Edge> {
    Ok(Edge {
        id: row.get(0)?,
        source: row.get(1)?,
        target: row.get(2)?,
        kind: decode(3, row.get(3)?, EdgeKind::from_str_loose)?,
        resolved: row.get::<_, i64>(4)? != 0,
        key: row.get(5)?,
        file_path: row.get(6)?,
        line: row.get(7)?,
        confidence: row.get(8)?,
        origin: decode(9, row.get(9)?, EdgeOrigin::from_str_loose)?,
        detail: row.get(10)?,
    })
}

pub fn row_to_file_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        path: row.get(0)?,
        language: decode(1, row.get(1)?, Language::from_str_loose)?,
        content_hash: row.get(2)?,
        line_count: row.get(3)?,
        parse_status: decode(4, row.get(4)?, ParseStatus::from_str_loose)?,
        parse_error: row.get(5)?,
    })
}

pub fn row_to_entry_point(row: &Row<'_>) -> rusqlite::Result<EntryPoint> {
    Ok(EntryPoint {
        id: row.get(0)?,
        symbol_id: row.get(1)?,
        trigger: decode(2, row.get(2)?, TriggerKind::from_str_loose)?,
        origin: decode(3, row.get(3)?, DesignationOrigin::from_str_loose)?,
        detail: row.get(4)?,
    })
}

pub fn row_to_outcome(row: &Row<'_>) -> rusqlite::Result<FinalOutcome> {
    Ok(FinalOutcome {
        id: row.get(0)?,
        symbol_id: row.get(1)?,
        effect: decode(2, row.get(2)?, EffectKind::from_str_loose)?,
        origin: decode(3, row.get(3)?, DesignationOrigin::from_str_loose)?,
        detail: row.get(4)?,
    })
}

pub fn row_to_coverage(row: &Row<'_>) -> rusqlite::Result<CoverageRecord> {
    Ok(CoverageRecord {
        file_path: row.get(0)?,
        source_lines: row.get(1)?,
        analysis_lines: row.get(2)?,
        required: row.get(3)?,
        status: decode(4, row.get(4)?, CoverageStatus::from_str_loose)?,
    })
}

pub fn row_to_issue(row: &Row<'_>) -> rusqlite::Result<ValidationIssue> {
    Ok(ValidationIssue {
        kind: decode(0, row.get(0)?, IssueKind::from_str_loose)?,
        subject: row.get(1)?,
        detail: row.get(2)?,
    })
}

pub fn row_to_candidate(row: &Row<'_>) -> rusqlite::Result<ConnectionCandidate> {
    Ok(ConnectionCandidate {
        kind: decode(0, row.get(0)?, EdgeKind::from_str_loose)?,
        key: row.get(1)?,
        side: decode(2, row.get(2)?, CandidateSide::from_str_loose)?,
        symbol_id: row.get(3)?,
        file_path: row.get(4)?,
        line: row.get(5)?,
    })
}

pub fn row_to_call_site(row: &Row<'_>) -> rusqlite::Result<CallSite> {
    Ok(CallSite {
        owner: row.get(0)?,
        callee: row.get(1)?,
        receiver: row.get(2)?,
        file_path: row.get(3)?,
        line: row.get(4)?,
    })
}

pub fn row_to_import_ref(row: &Row<'_>) -> rusqlite::Result<ImportRef> {
    let names_json: String = row.get(3)?;
    let names: Vec<String> = serde_json::from_str(&names_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    Ok(ImportRef {
        symbol_id: row.get(0)?,
        file_path: row.get(1)?,
        specifier: row.get(2)?,
        names,
        line: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::initialize_database;

    #[test]
    fn unknown_enum_value_is_a_conversion_error() {
        let conn = initialize_database(":memory:").unwrap();
        conn.execute(
            "INSERT INTO symbols (id, kind, name, qualified_name, file_path, start_line, end_line, language)
             VALUES ('x', 'gadget', 'x', 'x', 'a.ts', 1, 1, 'typescript')",
            [],
        )
        .unwrap();
        let err = conn
            .query_row(
                &format!("SELECT {SYMBOL_COLUMNS} FROM symbols"),
                [],
                row_to_symbol,
            )
            .unwrap_err();
        assert!(err.to_string().contains("gadget"), "{err}");
    }

    #[test]
    fn import_names_decode_from_json() {
        let conn = initialize_database(":memory:").unwrap();
        conn.execute(
            "INSERT INTO import_refs (symbol_id, file_path, specifier, names, line)
             VALUES ('i', 'a.ts', './b', '[\"x\",\"y\"]', 2)",
            [],
        )
        .unwrap();
        let r = conn
            .query_row(
                &format!("SELECT {IMPORT_REF_COLUMNS} FROM import_refs"),
                [],
                row_to_import_ref,
            )
            .unwrap();
        assert_eq!(r.names, vec!["x".to_string(), "y".to_string()]);
    }
}
