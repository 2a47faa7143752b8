//! Manual entry point and outcome designation.
//!
//! Detected designations arrive with each file's probe output and live and
//! die with that file. Manual ones are stored by file path and qualified
//! name, then re-applied against the current symbols after every index or
//! reindex pass. A manual designation that no longer matches a symbol is a
//! `dangling_designation` issue, never silently dropped.

use tracing::{debug, warn};

use crate::error::{CodeTraceError, Result};
use crate::graph::store::GraphStore;
use crate::types::{
    make_entry_point_id, make_outcome_id, DesignationOrigin, DesignationRole, EffectKind,
    EntryPoint, FinalOutcome, IssueKind, ManualDesignation, TriggerKind, ValidationIssue,
};

/// Record a manual designation after checking its kind string.
///
/// The target symbol does not have to exist yet; a missing symbol shows up
/// as a dangling designation until it does.
pub fn add_designation(store: &GraphStore, designation: &ManualDesignation) -> Result<()> {
    let valid = match designation.role {
        DesignationRole::Entry => TriggerKind::from_str_loose(&designation.kind).is_some(),
        DesignationRole::Outcome => EffectKind::from_str_loose(&designation.kind).is_some(),
    };
    if !valid {
        return Err(CodeTraceError::Config(format!(
            "unknown {} kind `{}`",
            designation.role.as_str(),
            designation.kind
        )));
    }
    store.add_manual_designation(designation)
}

/// Re-apply every manual designation. Returns the dangling ones as issues.
pub fn apply_manual_designations(store: &GraphStore) -> Result<Vec<ValidationIssue>> {
    let designations = store.manual_designations()?;
    store.write(|store| {
        store.clear_manual_designated()?;
        let mut dangling = Vec::new();
        for d in &designations {
            let Some(symbol) = store.find_symbol(&d.file_path, &d.qualified_name)? else {
                dangling.push(dangling_issue(d, "matches no symbol"));
                continue;
            };
            match d.role {
                DesignationRole::Entry => match TriggerKind::from_str_loose(&d.kind) {
                    Some(trigger) => store.insert_entry_point(&EntryPoint {
                        id: make_entry_point_id(&symbol.id, trigger),
                        symbol_id: symbol.id.clone(),
                        trigger,
                        origin: DesignationOrigin::Manual,
                        detail: None,
                    })?,
                    None => dangling.push(dangling_issue(d, "has an unknown trigger kind")),
                },
                DesignationRole::Outcome => match EffectKind::from_str_loose(&d.kind) {
                    Some(effect) => store.insert_outcome(&FinalOutcome {
                        id: make_outcome_id(&symbol.id, effect),
                        symbol_id: symbol.id.clone(),
                        effect,
                        origin: DesignationOrigin::Manual,
                        detail: None,
                    })?,
                    None => dangling.push(dangling_issue(d, "has an unknown effect kind")),
                },
            }
        }
        if !dangling.is_empty() {
            warn!(count = dangling.len(), "manual designations without a symbol");
        }
        debug!(applied = designations.len() - dangling.len(), "applied manual designations");
        Ok(dangling)
    })
}

/// Manual designations that currently match nothing, without touching the
/// designated rows.
pub fn dangling_designations(store: &GraphStore) -> Result<Vec<ValidationIssue>> {
    let mut out = Vec::new();
    for d in store.manual_designations()? {
        if store.find_symbol(&d.file_path, &d.qualified_name)?.is_none() {
            out.push(dangling_issue(&d, "matches no symbol"));
        }
    }
    Ok(out)
}

fn dangling_issue(d: &ManualDesignation, why: &str) -> ValidationIssue {
    ValidationIssue::new(
        IssueKind::DanglingDesignation,
        format!("{}:{}", d.file_path, d.qualified_name),
        format!("{} designation `{}` {why}", d.role.as_str(), d.kind),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{make_symbol_id, FileGraph, FileRecord, Language, ParseStatus, Symbol, SymbolKind};

    fn store_with_function(file: &str, name: &str) -> GraphStore {
        let store = GraphStore::new(":memory:").unwrap();
        let symbol = Symbol {
            id: make_symbol_id(SymbolKind::Function, file, name),
            kind: SymbolKind::Function,
            name: name.into(),
            qualified_name: name.into(),
            file_path: file.into(),
            start_line: 1,
            end_line: 3,
            language: Language::Python,
            signature: None,
            exported: true,
        };
        store
            .replace_file(&FileGraph {
                record: FileRecord {
                    path: file.into(),
                    language: Language::Python,
                    content_hash: "h".into(),
                    line_count: 3,
                    parse_status: ParseStatus::Parsed,
                    parse_error: None,
                },
                symbols: vec![symbol],
                call_sites: vec![],
                imports: vec![],
                candidates: vec![],
                entry_points: vec![],
                outcomes: vec![],
            })
            .unwrap();
        store
    }

    fn designation(role: DesignationRole, file: &str, name: &str, kind: &str) -> ManualDesignation {
        ManualDesignation {
            role,
            file_path: file.into(),
            qualified_name: name.into(),
            kind: kind.into(),
        }
    }

    #[test]
    fn manual_entry_is_applied() {
        let store = store_with_function("jobs/nightly.py", "run");
        add_designation(&store, &designation(DesignationRole::Entry, "jobs/nightly.py", "run", "scheduled_job"))
            .unwrap();
        let dangling = apply_manual_designations(&store).unwrap();
        assert!(dangling.is_empty());

        let entries = store.entry_points().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].origin, DesignationOrigin::Manual);
        assert_eq!(entries[0].trigger, TriggerKind::ScheduledJob);
    }

    #[test]
    fn reapplying_does_not_duplicate() {
        let store = store_with_function("svc.py", "store_row");
        add_designation(&store, &designation(DesignationRole::Outcome, "svc.py", "store_row", "db_write")).unwrap();
        apply_manual_designations(&store).unwrap();
        apply_manual_designations(&store).unwrap();
        assert_eq!(store.outcomes().unwrap().len(), 1);
    }

    #[test]
    fn missing_symbol_is_dangling() {
        let store = store_with_function("svc.py", "store_row");
        add_designation(&store, &designation(DesignationRole::Outcome, "svc.py", "gone", "email")).unwrap();
        let dangling = apply_manual_designations(&store).unwrap();
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].kind, IssueKind::DanglingDesignation);
        assert_eq!(dangling[0].subject, "svc.py:gone");
        assert_eq!(dangling_designations(&store).unwrap(), dangling);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let store = store_with_function("svc.py", "store_row");
        let err = add_designation(&store, &designation(DesignationRole::Entry, "svc.py", "store_row", "telepathy"))
            .unwrap_err();
        assert!(err.to_string().contains("telepathy"));
        assert!(store.manual_designations().unwrap().is_empty());
    }
}
