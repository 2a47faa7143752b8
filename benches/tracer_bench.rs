use std::collections::HashSet;

use codetrace::config::schema::TraceConfig;
use codetrace::graph::tracer::TraceGraph;
use codetrace::types::{
    make_entry_point_id, make_outcome_id, DesignationOrigin, Edge, EdgeKind, EdgeOrigin, EffectKind, EntryPoint,
    FinalOutcome, TriggerKind,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn node(layer: usize, idx: usize) -> String {
    format!("function:l{layer}.ts:f{idx}")
}

/// `layers` layers of `width` nodes, each node calling `fan_out` nodes in
/// the next layer, plus a back edge per layer. Outcomes sit on the last
/// layer.
fn layered_graph(layers: usize, width: usize, fan_out: usize) -> (Vec<Edge>, Vec<FinalOutcome>, HashSet<String>) {
    let mut edges = Vec::new();
    let mut symbols = HashSet::new();
    for layer in 0..layers {
        for idx in 0..width {
            let src = node(layer, idx);
            symbols.insert(src.clone());
            if layer + 1 == layers {
                continue;
            }
            for k in 0..fan_out {
                let tgt = node(layer + 1, (idx * 7 + k) % width);
                edges.push(Edge::resolved(EdgeKind::Call, &src, &tgt, Some(tgt.as_str()), "l.ts", 1, 1.0, EdgeOrigin::Static));
            }
        }
        if layer > 0 {
            let back = node(layer - 1, 0);
            let src = node(layer, width - 1);
            edges.push(Edge::resolved(EdgeKind::Event, &src, &back, Some("loop"), "l.ts", 1, 0.9, EdgeOrigin::Probe));
        }
    }
    let outcomes = (0..width)
        .map(|idx| {
            let symbol_id = node(layers - 1, idx);
            FinalOutcome {
                id: make_outcome_id(&symbol_id, EffectKind::DbWrite),
                symbol_id,
                effect: EffectKind::DbWrite,
                origin: DesignationOrigin::Detected,
                detail: None,
            }
        })
        .collect();
    (edges, outcomes, symbols)
}

fn entry(symbol_id: String) -> EntryPoint {
    EntryPoint {
        id: make_entry_point_id(&symbol_id, TriggerKind::HttpRoute),
        symbol_id,
        trigger: TriggerKind::HttpRoute,
        origin: DesignationOrigin::Detected,
        detail: None,
    }
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("trace_graph_build");
    for width in [50, 200, 800] {
        let (edges, outcomes, symbols) = layered_graph(8, width, 3);
        let follow = TraceConfig::default().follow;
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| TraceGraph::build(black_box(&edges), black_box(&outcomes), &follow, &symbols))
        });
    }
    group.finish();
}

fn bench_trace_entry(c: &mut Criterion) {
    let mut group = c.benchmark_group("trace_entry");
    for fan_out in [1, 2, 3] {
        let (edges, outcomes, symbols) = layered_graph(8, 100, fan_out);
        let config = TraceConfig::default();
        let graph = TraceGraph::build(&edges, &outcomes, &config.follow, &symbols);
        let start = entry(node(0, 0));
        group.bench_with_input(BenchmarkId::new("fan_out", fan_out), &fan_out, |b, _| {
            b.iter(|| graph.trace_entry(black_box(&start), &config))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_trace_entry);
criterion_main!(benches);
