//! Pathway tracer: bounded depth-first search from entry points to final
//! outcomes over resolved edges.
//!
//! Each entry point is traced independently against an immutable
//! [`TraceGraph`] snapshot, so entries run in parallel on the rayon pool and
//! only the write-back is serialized through [`GraphStore::write`].
//!
//! Branch rules:
//! - reaching a symbol that carries a final outcome ends the branch with one
//!   pathway per outcome on that symbol;
//! - reaching a symbol with no followed out-edges ends the branch as a dead
//!   end, persisted as an `unreachable` pathway;
//! - stepping onto a symbol already on the current branch is a cycle; the
//!   step is reported and not taken. The same symbol reached by two
//!   different branches is not a cycle;
//! - a branch that would exceed `max_depth` edges is cut and reported;
//! - once `max_branches_per_entry` branches have ended, the entry stops and
//!   the cut is reported.

use std::collections::{BTreeSet, HashMap, HashSet};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::schema::TraceConfig;
use crate::error::{CodeTraceError, Result};
use crate::graph::designate::dangling_designations;
use crate::graph::store::GraphStore;
use crate::resolution::calls::AMBIGUOUS_PREFIX;
use crate::types::{
    make_pathway_id, Edge, EdgeKind, EntryPoint, FinalOutcome, IssueKind, ParseStatus, Pathway,
    PathwayStatus, Termination, ValidationIssue,
};

// ---------------------------------------------------------------------------
// Graph snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Step {
    target: String,
    edge_id: String,
}

/// Adjacency over resolved, followed edges plus the outcome lookup.
#[derive(Debug, Default)]
pub struct TraceGraph {
    adjacency: HashMap<String, Vec<Step>>,
    outcomes: HashMap<String, Vec<String>>,
}

impl TraceGraph {
    /// Build from the stored edge set. Edges that are unresolved, of a kind
    /// not in `follow`, or that point at a symbol outside `symbols` are left
    /// out.
    pub fn build(
        edges: &[Edge],
        outcomes: &[FinalOutcome],
        follow: &[EdgeKind],
        symbols: &HashSet<String>,
    ) -> Self {
        let mut adjacency: HashMap<String, Vec<Step>> = HashMap::new();
        for e in edges {
            if !e.resolved || !follow.contains(&e.kind) {
                continue;
            }
            let Some(target) = e.target.as_deref() else {
                continue;
            };
            if !symbols.contains(target) || !symbols.contains(&e.source) {
                continue;
            }
            adjacency.entry(e.source.clone()).or_default().push(Step {
                target: target.to_string(),
                edge_id: e.id.clone(),
            });
        }
        for steps in adjacency.values_mut() {
            steps.sort();
        }

        let mut by_symbol: HashMap<String, Vec<String>> = HashMap::new();
        for o in outcomes {
            by_symbol.entry(o.symbol_id.clone()).or_default().push(o.id.clone());
        }
        for ids in by_symbol.values_mut() {
            ids.sort();
            ids.dedup();
        }

        Self {
            adjacency,
            outcomes: by_symbol,
        }
    }

    fn steps(&self, symbol: &str) -> &[Step] {
        self.adjacency.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Trace one entry point. Pathway statuses are provisional; the caller
    /// settles them against what was stored before.
    pub fn trace_entry(&self, entry: &EntryPoint, config: &TraceConfig) -> EntryTrace {
        let mut trace = EntryTrace {
            entry_point_id: entry.id.clone(),
            ..EntryTrace::default()
        };
        let mut issues: BTreeSet<ValidationIssue> = BTreeSet::new();
        let start = entry.symbol_id.as_str();
        trace.reach.insert(start.to_string());

        if let Some(ids) = self.outcomes.get(start) {
            for outcome_id in ids {
                trace.push_outcome(&entry.id, &[], &[start], outcome_id);
            }
            trace.issues = issues.into_iter().collect();
            return trace;
        }
        if self.steps(start).is_empty() {
            trace.push_dead_end(&entry.id, &[], &[start]);
            issues.insert(dead_end_issue(&entry.id, start));
            trace.issues = issues.into_iter().collect();
            return trace;
        }

        // Frame i explores the children of path[i]; steps[i] leads into path[i + 1].
        let mut frames: Vec<usize> = vec![0];
        let mut path: Vec<&str> = vec![start];
        let mut steps: Vec<&str> = Vec::new();
        let mut on_path: HashSet<&str> = HashSet::from([start]);
        let mut ended: usize = 0;

        while let Some(next) = frames.last_mut() {
            let node = path[path.len() - 1];
            let children = self.steps(node);
            let Some(step) = children.get(*next) else {
                frames.pop();
                on_path.remove(node);
                path.pop();
                steps.pop();
                continue;
            };
            *next += 1;

            if ended >= config.max_branches_per_entry {
                issues.insert(ValidationIssue::new(
                    IssueKind::BranchLimitExceeded,
                    &entry.id,
                    format!("stopped after {} branches", config.max_branches_per_entry),
                ));
                break;
            }

            let target = step.target.as_str();
            if on_path.contains(target) {
                issues.insert(ValidationIssue::new(
                    IssueKind::CycleDetected,
                    &entry.id,
                    format!("{node} -> {target}"),
                ));
                ended += 1;
                continue;
            }
            if steps.len() >= config.max_depth {
                issues.insert(ValidationIssue::new(
                    IssueKind::DepthLimitExceeded,
                    &entry.id,
                    format!("cut at {node} after {} steps", config.max_depth),
                ));
                ended += 1;
                continue;
            }

            trace.reach.insert(target.to_string());
            steps.push(step.edge_id.as_str());
            path.push(target);

            if let Some(ids) = self.outcomes.get(target) {
                for outcome_id in ids {
                    trace.push_outcome(&entry.id, &steps, &path, outcome_id);
                }
                ended += 1;
            } else if self.steps(target).is_empty() {
                trace.push_dead_end(&entry.id, &steps, &path);
                issues.insert(dead_end_issue(&entry.id, target));
                ended += 1;
            } else {
                frames.push(0);
                on_path.insert(target);
                continue;
            }
            steps.pop();
            path.pop();
        }

        trace.issues = issues.into_iter().collect();
        trace
    }
}

fn dead_end_issue(entry_point_id: &str, symbol: &str) -> ValidationIssue {
    ValidationIssue::new(IssueKind::DeadEnd, entry_point_id, format!("branch ends at {symbol}"))
}

// ---------------------------------------------------------------------------
// Per-entry result
// ---------------------------------------------------------------------------

/// Everything one entry point's trace produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryTrace {
    pub entry_point_id: String,
    pub pathways: Vec<Pathway>,
    /// Every symbol visited, including on branches that produced no pathway.
    pub reach: HashSet<String>,
    pub issues: Vec<ValidationIssue>,
}

impl EntryTrace {
    fn push_outcome(&mut self, entry_id: &str, steps: &[&str], path: &[&str], outcome_id: &str) {
        let steps: Vec<String> = steps.iter().map(|s| s.to_string()).collect();
        self.pathways.push(Pathway {
            id: make_pathway_id(entry_id, &steps, outcome_id),
            entry_point_id: entry_id.to_string(),
            outcome_id: Some(outcome_id.to_string()),
            status: PathwayStatus::Valid,
            termination: Termination::Outcome,
            steps,
            symbols: path.iter().map(|s| s.to_string()).collect(),
        });
    }

    fn push_dead_end(&mut self, entry_id: &str, steps: &[&str], path: &[&str]) {
        let steps: Vec<String> = steps.iter().map(|s| s.to_string()).collect();
        let end = path.last().copied().unwrap_or_default();
        self.pathways.push(Pathway {
            id: make_pathway_id(entry_id, &steps, end),
            entry_point_id: entry_id.to_string(),
            outcome_id: None,
            status: PathwayStatus::Unreachable,
            termination: Termination::DeadEnd,
            steps,
            symbols: path.iter().map(|s| s.to_string()).collect(),
        });
    }
}

// ---------------------------------------------------------------------------
// Store-level passes
// ---------------------------------------------------------------------------

/// Counts from one retrace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TraceSummary {
    pub entries: usize,
    pub pathways: usize,
    pub broken: usize,
    pub changed: usize,
}

/// Retrace entry points and write the results back.
///
/// `scope` limits the pass to the given entry point ids; `None` traces all
/// of them. A pathway id seen before keeps its stored status (a broken one
/// that reappears becomes `changed`) unless it runs through a symbol in
/// `touched`, in which case it gets `new_status` like a new outcome
/// pathway. A previously stored pathway that is no longer produced is
/// marked `broken` and kept for review, except dead ends, which are simply
/// dropped.
pub fn retrace(
    store: &GraphStore,
    config: &TraceConfig,
    scope: Option<&HashSet<String>>,
    touched: Option<&HashSet<String>>,
    new_status: PathwayStatus,
) -> Result<TraceSummary> {
    let symbols = store.symbol_ids()?;
    let graph = TraceGraph::build(&store.all_edges()?, &store.outcomes()?, &config.follow, &symbols);
    let entries: Vec<EntryPoint> = store
        .entry_points()?
        .into_iter()
        .filter(|e| scope.is_none_or(|s| s.contains(&e.id)))
        .collect();

    let traces: Vec<EntryTrace> = entries.par_iter().map(|e| graph.trace_entry(e, config)).collect();

    let summary = store.write(|store| {
        let mut summary = TraceSummary {
            entries: traces.len(),
            ..TraceSummary::default()
        };
        for trace in &traces {
            let prior: HashMap<String, Pathway> = store
                .pathways_for_entry(&trace.entry_point_id)?
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect();
            let produced: HashSet<&str> = trace.pathways.iter().map(|p| p.id.as_str()).collect();

            for p in &trace.pathways {
                let mut p = p.clone();
                let dirty = touched.is_some_and(|t| p.symbols.iter().any(|s| t.contains(s)));
                p.status = match prior.get(&p.id).map(|old| old.status) {
                    _ if p.termination == Termination::DeadEnd => PathwayStatus::Unreachable,
                    Some(PathwayStatus::Broken) => PathwayStatus::Changed,
                    Some(_) if dirty => new_status,
                    Some(old) => old,
                    None => new_status,
                };
                if p.status == PathwayStatus::Changed {
                    summary.changed += 1;
                }
                store.insert_pathway(&p)?;
                summary.pathways += 1;
            }
            for old in prior.values().filter(|old| !produced.contains(old.id.as_str())) {
                if retire_pathway(store, old)? {
                    summary.broken += 1;
                }
            }
            store.replace_trace_record(&trace.entry_point_id, &trace.reach, &trace.issues)?;
        }
        Ok(summary)
    })?;

    info!(
        entries = summary.entries,
        pathways = summary.pathways,
        broken = summary.broken,
        changed = summary.changed,
        "traced pathways"
    );
    Ok(summary)
}

/// Handle pathways whose entry point no longer exists. Returns how many
/// were marked broken.
pub fn retire_dead_entries(store: &GraphStore) -> Result<usize> {
    let live: HashSet<String> = store.entry_points()?.into_iter().map(|e| e.id).collect();
    store.write(|store| {
        let mut broken = 0;
        for p in store.pathways(None)? {
            if !live.contains(&p.entry_point_id) && retire_pathway(store, &p)? {
                broken += 1;
            }
        }
        store.prune_trace_records(&live)?;
        Ok(broken)
    })
}

/// Broken pathways stay for review; dead ends just go away.
fn retire_pathway(store: &GraphStore, p: &Pathway) -> Result<bool> {
    match (p.termination, p.status) {
        (Termination::DeadEnd, _) => {
            store.delete_pathway(&p.id)?;
            Ok(false)
        }
        (_, PathwayStatus::Broken) => Ok(false),
        _ => {
            store.set_pathway_status(&p.id, PathwayStatus::Broken)?;
            Ok(true)
        }
    }
}

// ---------------------------------------------------------------------------
// Graph-wide validation
// ---------------------------------------------------------------------------

/// Recompute graph-wide issues and return the full itemized list.
///
/// An entry point is an orphan when no live pathway from it ends in an
/// outcome; an outcome is unreachable when no live pathway ends at it.
/// Broken pathways do not count as live.
pub fn validate(store: &GraphStore) -> Result<Vec<ValidationIssue>> {
    let live: Vec<Pathway> = store
        .pathways(None)?
        .into_iter()
        .filter(|p| p.status != PathwayStatus::Broken && p.termination == Termination::Outcome)
        .collect();
    let reached_from: HashSet<&str> = live.iter().map(|p| p.entry_point_id.as_str()).collect();
    let reached_outcomes: HashSet<&str> = live.iter().filter_map(|p| p.outcome_id.as_deref()).collect();

    let mut issues = Vec::new();
    for e in store.entry_points()? {
        if !reached_from.contains(e.id.as_str()) {
            issues.push(ValidationIssue::new(
                IssueKind::OrphanEntryPoint,
                &e.id,
                format!("{} {} reaches no outcome", e.trigger.as_str(), e.symbol_id),
            ));
        }
    }
    for o in store.outcomes()? {
        if !reached_outcomes.contains(o.id.as_str()) {
            issues.push(ValidationIssue::new(
                IssueKind::UnreachableOutcome,
                &o.id,
                format!("{} {} is reached by no entry point", o.effect.as_str(), o.symbol_id),
            ));
        }
    }
    for f in store.all_files()? {
        if f.parse_status == ParseStatus::Unparsed {
            issues.push(ValidationIssue::new(
                IssueKind::UnparsedFile,
                &f.path,
                f.parse_error.unwrap_or_default(),
            ));
        }
    }
    for e in store.unresolved_edges()? {
        if let Some(detail) = e.detail.as_deref().filter(|d| d.starts_with(AMBIGUOUS_PREFIX)) {
            issues.push(ValidationIssue::new(
                IssueKind::AmbiguousResolution,
                &e.source,
                format!("{} at {}:{} {detail}", e.key.as_deref().unwrap_or(""), e.file_path, e.line),
            ));
        }
    }
    issues.extend(dangling_designations(store)?);

    store.replace_graph_issues(&issues)?;
    let all = store.issues()?;
    debug!(graph_issues = issues.len(), total = all.len(), "validated graph");
    Ok(all)
}

// ---------------------------------------------------------------------------
// Review
// ---------------------------------------------------------------------------

/// What a reviewer does with a pathway that needs attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    /// Trust a `changed` pathway again.
    Accept,
    /// Drop a `broken` pathway for good.
    Dismiss,
}

/// Apply a reviewer decision. Returns the new status, or `None` when the
/// pathway was removed.
pub fn review_pathway(store: &GraphStore, id: &str, action: ReviewAction) -> Result<Option<PathwayStatus>> {
    let pathway = store
        .get_pathway(id)?
        .ok_or_else(|| CodeTraceError::NotFound(format!("pathway {id}")))?;
    match (action, pathway.status) {
        (ReviewAction::Accept, PathwayStatus::Changed) => {
            store.set_pathway_status(id, PathwayStatus::Valid)?;
            info!(pathway = id, "accepted");
            Ok(Some(PathwayStatus::Valid))
        }
        (ReviewAction::Dismiss, PathwayStatus::Broken) => {
            store.delete_pathway(id)?;
            info!(pathway = id, "dismissed");
            Ok(None)
        }
        (ReviewAction::Accept, status) => Err(CodeTraceError::Other(format!(
            "pathway {id} is {}; only changed pathways can be accepted",
            status.as_str()
        ))),
        (ReviewAction::Dismiss, status) => Err(CodeTraceError::Other(format!(
            "pathway {id} is {}; only broken pathways can be dismissed",
            status.as_str()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
