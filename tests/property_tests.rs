//! Property-based tests using proptest.
//!
//! These check invariants that must hold for every input: the coverage
//! formula, traversal bounds on cyclic graphs, and id stability.

use std::collections::HashSet;

use proptest::prelude::*;

use codetrace::audit::coverage::coverage_status;
use codetrace::config::schema::TraceConfig;
use codetrace::graph::tracer::TraceGraph;
use codetrace::indexer::pipeline::count_lines;
use codetrace::types::{
    make_edge_id, make_entry_point_id, make_symbol_id, CoverageStatus, DesignationOrigin, Edge, EdgeKind,
    EdgeOrigin, EntryPoint, SymbolKind, TriggerKind,
};

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

/// A ring of `n` nodes plus random chords: every node has an out-edge, so
/// every branch ends in a cycle or a cut.
fn arb_cyclic_graph() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (2usize..14).prop_flat_map(|n| (Just(n), prop::collection::vec((0..n, 0..n), 0..30)))
}

fn node(i: usize) -> String {
    format!("n{i}")
}

fn entry(symbol: &str) -> EntryPoint {
    EntryPoint {
        id: make_entry_point_id(symbol, TriggerKind::HttpRoute),
        symbol_id: symbol.to_string(),
        trigger: TriggerKind::HttpRoute,
        origin: DesignationOrigin::Detected,
        detail: None,
    }
}

fn call(src: &str, tgt: &str) -> Edge {
    Edge::resolved(EdgeKind::Call, src, tgt, Some(tgt), "g.ts", 1, 1.0, EdgeOrigin::Static)
}

// ---------------------------------------------------------------------------
// Coverage
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn required_is_ceiling_of_lines_over_fifty(lines in 0u32..2_000_000) {
        let (required, _) = coverage_status(lines, 0, 50);
        prop_assert_eq!(required, lines.div_ceil(50));
    }

    #[test]
    fn more_analysis_never_lowers_status(lines in 1u32..100_000, a in 0u32..5_000, extra in 0u32..5_000) {
        let (_, before) = coverage_status(lines, a, 50);
        let (_, after) = coverage_status(lines, a + extra, 50);
        prop_assert!(after >= before, "{before:?} -> {after:?}");
    }

    #[test]
    fn zero_analysis_is_always_missing(lines in 0u32..100_000) {
        prop_assert_eq!(coverage_status(lines, 0, 50).1, CoverageStatus::Missing);
    }
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn tracing_a_cyclic_graph_terminates_within_bounds(
        (n, chords) in arb_cyclic_graph(),
        max_depth in 1usize..20,
        max_branches in 1usize..64,
    ) {
        let mut edges: Vec<Edge> = (0..n).map(|i| call(&node(i), &node((i + 1) % n))).collect();
        edges.extend(chords.iter().map(|(a, b)| call(&node(*a), &node(*b))));
        let symbols: HashSet<String> = (0..n).map(node).collect();

        let graph = TraceGraph::build(&edges, &[], &[EdgeKind::Call], &symbols);
        let config = TraceConfig {
            max_depth,
            max_branches_per_entry: max_branches,
            ..TraceConfig::default()
        };
        let trace = graph.trace_entry(&entry("n0"), &config);

        prop_assert!(trace.pathways.len() <= max_branches);
        prop_assert!(trace.pathways.iter().all(|p| p.steps.len() <= max_depth));
        prop_assert!(!trace.issues.is_empty(), "a cyclic graph with no outcomes must report something");
        prop_assert!(trace.reach.iter().all(|s| symbols.contains(s)));
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn symbol_ids_are_deterministic_and_kind_scoped(
        file in "[a-z]{1,8}/[a-z]{1,8}\\.ts",
        name in "[A-Za-z_][A-Za-z0-9_]{0,12}",
    ) {
        let a = make_symbol_id(SymbolKind::Function, &file, &name);
        let b = make_symbol_id(SymbolKind::Function, &file, &name);
        prop_assert_eq!(&a, &b);
        prop_assert_ne!(a, make_symbol_id(SymbolKind::Method, &file, &name));
    }

    #[test]
    fn edge_ids_separate_targets(src in "[a-z]{1,6}", t1 in "[a-z]{1,6}", t2 in "[a-z]{1,6}", key in "[a-z.]{0,10}") {
        prop_assume!(t1 != t2);
        prop_assert_ne!(
            make_edge_id(EdgeKind::Event, &src, Some(t1.as_str()), &key),
            make_edge_id(EdgeKind::Event, &src, Some(t2.as_str()), &key)
        );
        prop_assert_ne!(
            make_edge_id(EdgeKind::Event, &src, Some(t1.as_str()), &key),
            make_edge_id(EdgeKind::Event, &src, None, &key)
        );
    }

    #[test]
    fn line_count_matches_text_lines(text in "[a-z \\n]{0,200}") {
        prop_assert_eq!(count_lines(text.as_bytes()) as usize, text.lines().count());
    }
}
