//! Command-line interface: argument definitions and command dispatch.
//!
//! Human-readable output goes to stdout with `console` styling; `--json`
//! switches a command to machine-readable output. Logs go to stderr.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{info, warn};

use crate::audit::coverage::{coverage_report, CoverageReport};
use crate::audit::reindex::{reindex, ReindexOptions, ReindexReport};
use crate::config::{load_config, CodeTraceConfig};
use crate::error::{CodeTraceError, Result};
use crate::git::ChangeKind;
use crate::graph::designate::{add_designation, apply_manual_designations};
use crate::graph::store::GraphStore;
use crate::graph::tracer::{retrace, review_pathway, validate, ReviewAction, TraceSummary};
use crate::indexer::pipeline::index_project;
use crate::observability::IndexMetrics;
use crate::probe::catalog::normalize_key;
use crate::probe::merge::{remerge, unmatched_receivers};
use crate::resolution::relink;
use crate::types::{
    ConnectionCandidate, DesignationRole, Edge, EdgeKind, ManualDesignation, Pathway, PathwayStatus, Resolution,
    ValidationIssue,
};

/// Incremental code reference graph: trace pathways from entry points to
/// final outcomes and audit analysis coverage per file.
#[derive(Parser, Debug)]
#[command(name = "codetrace", version, about, long_about = None, propagate_version = true)]
pub struct Cli {
    /// Project root to index.
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Graph database path (overrides `store.db_path`).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Config file to use instead of `<root>/.codetrace.yaml`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index the whole tree: extract, resolve, probe, merge, trace, audit.
    Index {
        #[arg(long)]
        json: bool,
    },

    /// Update the index from a change set.
    ///
    /// Inside a git repository the range defaults to
    /// `last_reindex_commit..HEAD`; otherwise files are compared by
    /// content hash.
    Reindex {
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Retrace every entry point.
    Trace {
        #[arg(long)]
        json: bool,
    },

    /// Per-file coverage with gap triage and shared symbols.
    Coverage {
        #[arg(long)]
        json: bool,
    },

    /// Validation issues, unresolved edges, and unmatched receivers.
    Issues {
        #[arg(long)]
        json: bool,
    },

    /// List traced pathways.
    Pathways {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        #[arg(long)]
        json: bool,
    },

    /// Designate a symbol as an entry point or final outcome by hand.
    Designate {
        #[arg(value_enum)]
        role: RoleArg,
        /// File containing the symbol, relative to the root.
        #[arg(long)]
        file: String,
        /// Qualified symbol name, e.g. `OrderService.create`.
        #[arg(long)]
        symbol: String,
        /// Trigger kind (entry) or effect kind (outcome), e.g. `http_route`.
        #[arg(long)]
        kind: String,
    },

    /// Supply the target of an unresolved edge and re-run merge.
    Resolve {
        /// Edge kind, e.g. `event`, `http`, `unknown`.
        #[arg(long)]
        kind: String,
        #[arg(long)]
        key: String,
        /// Target symbol id.
        #[arg(long)]
        target: String,
        /// Restrict to one source symbol id.
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },

    /// Accept a changed pathway or dismiss a broken one.
    Review {
        pathway_id: String,
        #[arg(value_enum)]
        action: ReviewArg,
    },

    /// Row counts per table.
    Stats {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum StatusArg {
    Valid,
    Broken,
    Changed,
    Unreachable,
}

impl From<StatusArg> for PathwayStatus {
    fn from(s: StatusArg) -> Self {
        match s {
            StatusArg::Valid => Self::Valid,
            StatusArg::Broken => Self::Broken,
            StatusArg::Changed => Self::Changed,
            StatusArg::Unreachable => Self::Unreachable,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum RoleArg {
    Entry,
    Outcome,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ReviewArg {
    Accept,
    Dismiss,
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Resolve the database location: `--db`, else `store.db_path`, relative
/// paths anchored at the project root.
pub fn db_path(root: &Path, flag: Option<&Path>, config: &CodeTraceConfig) -> PathBuf {
    let path = flag.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(&config.store.db_path));
    if path.is_absolute() || path.as_os_str() == ":memory:" {
        path
    } else {
        root.join(path)
    }
}

fn open_store(path: &Path, config: &CodeTraceConfig) -> Result<GraphStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    GraphStore::open(&path.to_string_lossy(), config.store.busy_retries, config.store.busy_timeout_ms)
}

fn configure_workers(workers: usize) {
    if workers == 0 {
        return;
    }
    if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(workers).build_global() {
        warn!(error = %e, "could not size the worker pool");
    }
}

/// Run one parsed command line.
pub fn run(cli: Cli) -> Result<()> {
    let root = cli.root.clone();
    let config = load_config(&root, cli.config.as_deref())?;
    configure_workers(config.index.workers);

    let db = db_path(&root, cli.db.as_deref(), &config);
    let store = open_store(&db, &config)?;
    info!(root = %root.display(), db = %db.display(), "opened graph");

    match cli.command {
        Commands::Index { json } => {
            let bar = progress_bar();
            let metrics = index_project(&store, &root, &config, Some(&bar))?;
            bar.finish_and_clear();
            emit(json, &metrics, print_metrics)
        }
        Commands::Reindex { from, to, json } => {
            let report = reindex(&store, &root, &config, &ReindexOptions { from, to })?;
            emit(json, &report, print_reindex)
        }
        Commands::Trace { json } => {
            let summary = retrace(&store, &config.trace, None, None, PathwayStatus::Valid)?;
            validate(&store)?;
            emit(json, &summary, print_trace)
        }
        Commands::Coverage { json } => emit(json, &coverage_report(&store)?, print_coverage),
        Commands::Issues { json } => {
            let report = IssuesReport {
                issues: store.issues()?,
                unresolved_edges: store.unresolved_edges()?,
                unmatched_receivers: unmatched_receivers(&store.all_candidates()?),
            };
            emit(json, &report, print_issues)
        }
        Commands::Pathways { status, json } => {
            let pathways = store.pathways(status.map(PathwayStatus::from))?;
            emit(json, &pathways, |p| print_pathways(p))
        }
        Commands::Designate {
            role,
            file,
            symbol,
            kind,
        } => {
            let designation = ManualDesignation {
                role: match role {
                    RoleArg::Entry => DesignationRole::Entry,
                    RoleArg::Outcome => DesignationRole::Outcome,
                },
                file_path: file,
                qualified_name: symbol,
                kind,
            };
            add_designation(&store, &designation)?;
            let dangling = apply_manual_designations(&store)?;
            let summary = retrace(&store, &config.trace, None, None, PathwayStatus::Changed)?;
            validate(&store)?;
            for issue in &dangling {
                println!("{} {}: {}", style("dangling").yellow(), issue.subject, issue.detail);
            }
            print_trace(&summary);
            Ok(())
        }
        Commands::Resolve {
            kind,
            key,
            target,
            source,
            note,
        } => {
            let kind = EdgeKind::from_str_loose(&kind)
                .ok_or_else(|| CodeTraceError::Config(format!("unknown edge kind `{kind}`")))?;
            if store.get_symbol(&target)?.is_none() {
                return Err(CodeTraceError::NotFound(format!("symbol {target}")));
            }
            let key = match kind {
                EdgeKind::Call | EdgeKind::Unknown => key,
                _ => normalize_key(kind, &key),
            };
            store.add_resolution(&Resolution {
                kind,
                key: key.clone(),
                source,
                target,
                note,
            })?;
            match kind {
                EdgeKind::Call | EdgeKind::Unknown => {
                    relink(&store, &config.resolution, None)?;
                }
                _ => {
                    let keys: HashSet<(EdgeKind, String)> = [(kind, key)].into_iter().collect();
                    remerge(&store, Some(&keys))?;
                }
            }
            let summary = retrace(&store, &config.trace, None, None, PathwayStatus::Changed)?;
            validate(&store)?;
            print_trace(&summary);
            Ok(())
        }
        Commands::Review { pathway_id, action } => {
            let action = match action {
                ReviewArg::Accept => ReviewAction::Accept,
                ReviewArg::Dismiss => ReviewAction::Dismiss,
            };
            let status = review_pathway(&store, &pathway_id, action)?;
            validate(&store)?;
            match status {
                Some(s) => println!("{} {pathway_id} is now {}", style("ok").green(), s.as_str()),
                None => println!("{} {pathway_id} dismissed", style("ok").green()),
            }
            Ok(())
        }
        Commands::Stats { json } => {
            let stats = store.get_stats()?;
            emit(json, &stats, |s| {
                println!("{}", style("graph").bold());
                println!("  files            {} ({} unparsed)", s.files, s.unparsed_files);
                println!("  symbols          {}", s.symbols);
                println!("  edges            {} ({} unresolved)", s.edges, s.unresolved_edges);
                println!("  entry points     {}", s.entry_points);
                println!("  final outcomes   {}", s.outcomes);
                println!("  pathways         {}", s.pathways);
                println!("  issues           {}", s.issues);
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct IssuesReport {
    issues: Vec<ValidationIssue>,
    unresolved_edges: Vec<Edge>,
    unmatched_receivers: Vec<ConnectionCandidate>,
}

fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

fn progress_bar() -> ProgressBar {
    if !console::Term::stderr().is_term() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

fn print_metrics(m: &IndexMetrics) {
    println!(
        "{} {} files ({} unparsed) in {} ms",
        style("indexed").green().bold(),
        m.files_indexed,
        m.files_unparsed,
        m.duration_ms
    );
    println!("  symbols     {}", m.symbols);
    println!("  edges       {} resolved, {} unresolved", m.edges_resolved, m.edges_unresolved);
    println!("  candidates  {}", m.candidates);
    println!(
        "  pathways    {} ({} broken, {} changed)",
        m.pathways, m.pathways_broken, m.pathways_changed
    );
    println!("  issues      {}", m.issues);
}

fn print_reindex(r: &ReindexReport) {
    match (&r.from, &r.to) {
        (Some(from), Some(to)) => println!("{} {}..{}", style("reindex").green().bold(), short(from), short(to)),
        _ => println!("{} by content hash", style("reindex").green().bold()),
    }
    for c in &r.changes {
        match &c.kind {
            ChangeKind::Renamed { from } => println!("  {:<9} {} -> {}", c.kind.as_str(), from, c.path),
            kind => println!("  {:<9} {}", kind.as_str(), c.path),
        }
    }
    println!(
        "  {} touched symbols, {} entry points retraced",
        r.touched_symbols, r.retraced_entries
    );
    print_metrics(&r.metrics);
}

fn print_trace(s: &TraceSummary) {
    println!(
        "{} {} entry points, {} pathways ({} broken, {} changed)",
        style("traced").green().bold(),
        s.entries,
        s.pathways,
        s.broken,
        s.changed
    );
}

fn print_coverage(r: &CoverageReport) {
    println!(
        "{} {} files: {} adequate, {} shallow, {} missing",
        style("coverage").bold(),
        r.files,
        style(r.adequate).green(),
        style(r.shallow).yellow(),
        style(r.missing).red()
    );
    for (severity, bucket) in &r.triage {
        println!(
            "  {:<10} {} files, {} source lines, {} analysis lines short",
            severity.as_str(),
            bucket.files,
            bucket.source_lines,
            bucket.missing_lines
        );
    }
    for g in &r.gaps {
        println!(
            "  [{}] {} ({} lines): {}/{} analysis lines",
            g.severity.as_str(),
            g.record.file_path,
            g.record.source_lines,
            g.record.analysis_lines,
            g.record.required
        );
    }
    if !r.shared_symbols.is_empty() {
        println!("{}", style("shared symbols").bold());
        for s in &r.shared_symbols {
            println!("  {} ({}) used by {} files", s.name, s.defined_in, s.callers.len());
        }
    }
}

fn print_issues(r: &IssuesReport) {
    println!("{} {}", style("issues").bold(), r.issues.len());
    for i in &r.issues {
        println!("  {:<22} {}  {}", i.kind.as_str(), i.subject, i.detail);
    }
    println!("{} {}", style("unresolved edges").bold(), r.unresolved_edges.len());
    for e in &r.unresolved_edges {
        println!(
            "  {:<20} {}:{}  {}  {}",
            e.kind.as_str(),
            e.file_path,
            e.line,
            e.key.as_deref().unwrap_or(""),
            e.detail.as_deref().unwrap_or("")
        );
    }
    println!("{} {}", style("unmatched receivers").bold(), r.unmatched_receivers.len());
    for c in &r.unmatched_receivers {
        println!("  {:<20} {}:{}  {}", c.kind.as_str(), c.file_path, c.line, c.key);
    }
}

fn print_pathways(pathways: &[Pathway]) {
    for p in pathways {
        let status = match p.status {
            PathwayStatus::Valid => style(p.status.as_str()).green(),
            PathwayStatus::Changed => style(p.status.as_str()).yellow(),
            PathwayStatus::Broken | PathwayStatus::Unreachable => style(p.status.as_str()).red(),
        };
        println!("{} {:<11} {}", p.id, status, p.symbols.join(" -> "));
    }
    println!("{} pathways", pathways.len());
}

fn short(rev: &str) -> &str {
    rev.get(..8).unwrap_or(rev)
}
