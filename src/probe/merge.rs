//! Merge and deduplication of connection candidates.
//!
//! Candidates are grouped by `(kind, key)`. Within a group every emitter is
//! paired with every receiver, so one event with three listeners yields
//! three resolved edges. An emitter with no receiver becomes one unresolved
//! edge unless a reviewer resolution names its target. Receivers with no
//! emitter are reported, never turned into edges, since an edge needs an
//! existing source.
//!
//! Edge ids hash `(kind, source, target, key)`, so merging the same
//! candidates twice writes the same rows.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use crate::error::Result;
use crate::graph::store::GraphStore;
use crate::types::{CandidateSide, ConnectionCandidate, Edge, EdgeKind, EdgeOrigin, Resolution};

/// Confidence assigned to an emitter/receiver pair matched by key.
pub const PROBE_CONFIDENCE: f64 = 0.9;

/// Result of one merge pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeResult {
    pub edges: Vec<Edge>,
    pub unmatched_receivers: Vec<ConnectionCandidate>,
}

impl MergeResult {
    pub fn resolved(&self) -> usize {
        self.edges.iter().filter(|e| e.resolved).count()
    }

    pub fn unresolved(&self) -> usize {
        self.edges.len() - self.resolved()
    }
}

/// Pair emitters with receivers per `(kind, key)` group.
pub fn merge_candidates(candidates: &[ConnectionCandidate], resolutions: &[Resolution]) -> MergeResult {
    let mut groups: BTreeMap<(EdgeKind, &str), (Vec<&ConnectionCandidate>, Vec<&ConnectionCandidate>)> =
        BTreeMap::new();
    for c in candidates {
        let group = groups.entry((c.kind, c.key.as_str())).or_default();
        match c.side {
            CandidateSide::Emit => group.0.push(c),
            CandidateSide::Receive => group.1.push(c),
        }
    }

    let mut result = MergeResult::default();
    for ((kind, key), (emits, receives)) in groups {
        let emits = first_per_symbol(emits);
        let receives = first_per_symbol(receives);

        if emits.is_empty() {
            result.unmatched_receivers.extend(receives.into_iter().cloned());
            continue;
        }

        for e in &emits {
            let targets: Vec<&&ConnectionCandidate> =
                receives.iter().filter(|r| r.symbol_id != e.symbol_id).collect();
            if !targets.is_empty() {
                for r in targets {
                    result.edges.push(Edge::resolved(
                        kind,
                        &e.symbol_id,
                        &r.symbol_id,
                        Some(key),
                        &e.file_path,
                        e.line,
                        PROBE_CONFIDENCE,
                        EdgeOrigin::Probe,
                    ));
                }
                continue;
            }

            let manual: BTreeSet<&str> = resolutions
                .iter()
                .filter(|r| r.kind == kind && r.key == key)
                .filter(|r| r.source.as_deref().is_none_or(|s| s == e.symbol_id))
                .map(|r| r.target.as_str())
                .collect();
            if manual.is_empty() {
                result.edges.push(Edge::unresolved(
                    kind,
                    &e.symbol_id,
                    key,
                    &e.file_path,
                    e.line,
                    EdgeOrigin::Probe,
                    None,
                ));
            } else {
                for target in manual {
                    result.edges.push(Edge::resolved(
                        kind,
                        &e.symbol_id,
                        target,
                        Some(key),
                        &e.file_path,
                        e.line,
                        1.0,
                        EdgeOrigin::Manual,
                    ));
                }
            }
        }
    }
    result
}

/// One candidate per symbol: the earliest line wins.
fn first_per_symbol(mut side: Vec<&ConnectionCandidate>) -> Vec<&ConnectionCandidate> {
    side.sort_by(|a, b| (&a.symbol_id, a.line, &a.file_path).cmp(&(&b.symbol_id, b.line, &b.file_path)));
    side.dedup_by(|a, b| a.symbol_id == b.symbol_id);
    side
}

/// Receivers whose `(kind, key)` has no emitter anywhere.
pub fn unmatched_receivers(candidates: &[ConnectionCandidate]) -> Vec<ConnectionCandidate> {
    merge_candidates(candidates, &[]).unmatched_receivers
}

/// Rewrite connection edges, fully (`None`) or for the given key groups.
pub fn remerge(store: &GraphStore, keys: Option<&HashSet<(EdgeKind, String)>>) -> Result<MergeResult> {
    let candidates = match keys {
        None => store.all_candidates()?,
        Some(keys) => {
            let mut out = Vec::new();
            for (kind, key) in keys {
                out.extend(store.candidates_for_key(*kind, key)?);
            }
            out
        }
    };
    let resolutions = store.resolutions()?;
    let merged = merge_candidates(&candidates, &resolutions);

    store.write(|store| {
        store.delete_connection_edges(keys)?;
        store.insert_edges(&merged.edges)
    })?;
    debug!(
        scoped = keys.is_some(),
        resolved = merged.resolved(),
        unresolved = merged.unresolved(),
        unmatched = merged.unmatched_receivers.len(),
        "merged connection candidates"
    );
    Ok(merged)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cand(kind: EdgeKind, key: &str, side: CandidateSide, symbol: &str, file: &str, line: u32) -> ConnectionCandidate {
        ConnectionCandidate {
            kind,
            key: key.into(),
            side,
            symbol_id: symbol.into(),
            file_path: file.into(),
            line,
        }
    }

    fn emitter() -> ConnectionCandidate {
        cand(EdgeKind::Event, "order.created", CandidateSide::Emit, "function:a.ts:createOrder", "a.ts", 2)
    }

    fn listener() -> ConnectionCandidate {
        cand(EdgeKind::Event, "order.created", CandidateSide::Receive, "function:b.ts:onCreated", "b.ts", 4)
    }

    #[test]
    fn emitter_alone_is_one_unresolved_edge() {
        let merged = merge_candidates(&[emitter()], &[]);
        assert_eq!(merged.edges.len(), 1);
        let e = &merged.edges[0];
        assert_eq!((e.kind, e.key.as_deref(), e.target.as_deref()), (EdgeKind::Event, Some("order.created"), None));
        assert!(!e.resolved);
    }

    #[test]
    fn listener_alone_is_an_unmatched_receiver() {
        let merged = merge_candidates(&[listener()], &[]);
        assert!(merged.edges.is_empty());
        assert_eq!(merged.unmatched_receivers, vec![listener()]);
    }

    #[test]
    fn both_halves_merge_into_exactly_one_edge() {
        // Each half found twice, as when both files re-discover the link.
        let candidates = vec![emitter(), listener(), emitter(), listener()];
        let merged = merge_candidates(&candidates, &[]);
        assert_eq!(merged.edges.len(), 1);
        let e = &merged.edges[0];
        assert!(e.resolved);
        assert_eq!(e.source, "function:a.ts:createOrder");
        assert_eq!(e.target.as_deref(), Some("function:b.ts:onCreated"));
        assert_eq!(e.confidence, PROBE_CONFIDENCE);
        assert!(merged.unmatched_receivers.is_empty());
    }

    #[test]
    fn fan_out_creates_one_edge_per_listener() {
        let second = cand(EdgeKind::Event, "order.created", CandidateSide::Receive, "function:c.ts:audit", "c.ts", 1);
        let merged = merge_candidates(&[emitter(), listener(), second], &[]);
        assert_eq!(merged.resolved(), 2);
    }

    #[test]
    fn kinds_do_not_cross_match() {
        let pubsub = cand(EdgeKind::PubSub, "order.created", CandidateSide::Receive, "function:b.ts:sub", "b.ts", 1);
        let merged = merge_candidates(&[emitter(), pubsub.clone()], &[]);
        assert_eq!(merged.unresolved(), 1);
        assert_eq!(merged.unmatched_receivers, vec![pubsub]);
    }

    #[test]
    fn resolution_turns_unresolved_emitter_into_manual_edge() {
        let resolution = Resolution {
            kind: EdgeKind::Event,
            key: "order.created".into(),
            source: None,
            target: "function:vendor/hooks.ts:onOrder".into(),
            note: Some("listener lives in a plugin".into()),
        };
        let merged = merge_candidates(&[emitter()], &[resolution]);
        assert_eq!(merged.edges.len(), 1);
        assert_eq!(merged.edges[0].origin, EdgeOrigin::Manual);
        assert!(merged.edges[0].resolved);
    }

    #[test]
    fn merge_is_idempotent_in_store() {
        let store = GraphStore::new(":memory:").unwrap();
        store.insert_candidates(&[emitter(), listener()]).unwrap();
        remerge(&store, None).unwrap();
        let first = store.all_edges().unwrap();
        remerge(&store, None).unwrap();
        assert_eq!(first, store.all_edges().unwrap());
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn scoped_remerge_leaves_other_keys_alone() {
        let store = GraphStore::new(":memory:").unwrap();
        let other = cand(EdgeKind::Http, "/orders", CandidateSide::Emit, "function:ui.ts:load", "ui.ts", 3);
        store.insert_candidates(&[emitter(), listener(), other]).unwrap();
        remerge(&store, None).unwrap();

        let keys: HashSet<(EdgeKind, String)> = [(EdgeKind::Event, "order.created".to_string())].into();
        remerge(&store, Some(&keys)).unwrap();
        assert_eq!(store.all_edges().unwrap().len(), 2);
        assert_eq!(store.edges_by_kind_key(EdgeKind::Http, "/orders").unwrap().len(), 1);
    }
}
