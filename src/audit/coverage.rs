//! Coverage auditing: how much analysis exists for each source file.
//!
//! A file of `L` lines needs `ceil(L / lines_per_analysis_line)` lines of
//! analysis. Analysis lines are lines of Markdown under the configured
//! analysis directories that mention the file, either by its indexed path
//! (or any path ending in it) or by bare file name when no other indexed
//! file shares that name.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::schema::CoverageConfig;
use crate::error::Result;
use crate::graph::store::GraphStore;
use crate::types::{CoverageRecord, CoverageStatus, EdgeKind, SymbolKind};

// ---------------------------------------------------------------------------
// Formula
// ---------------------------------------------------------------------------

/// `(required, status)` for a file. Zero analysis lines is always
/// `missing`, even for an empty file.
pub fn coverage_status(source_lines: u32, analysis_lines: u32, lines_per_analysis_line: u32) -> (u32, CoverageStatus) {
    let per = lines_per_analysis_line.max(1);
    let required = source_lines.div_ceil(per);
    let status = if analysis_lines == 0 {
        CoverageStatus::Missing
    } else if analysis_lines >= required {
        CoverageStatus::Adequate
    } else {
        CoverageStatus::Shallow
    };
    (required, status)
}

// ---------------------------------------------------------------------------
// Analysis index
// ---------------------------------------------------------------------------

static MENTION_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn mention_re() -> Option<&'static Regex> {
    MENTION_RE
        .get_or_init(|| match Regex::new(r"[A-Za-z0-9_@$()\[\]./\\-]+\.[A-Za-z0-9]+") {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(error = %e, "mention pattern failed to compile");
                None
            }
        })
        .as_ref()
}

/// Analysis line counts per indexed source file.
#[derive(Debug, Default)]
pub struct AnalysisIndex {
    lines: HashMap<String, u32>,
    documents: usize,
}

impl AnalysisIndex {
    /// Scan the analysis directories under `root` for mentions of `files`.
    pub fn build(root: &Path, config: &CoverageConfig, files: &[String]) -> Self {
        let by_path: HashSet<&str> = files.iter().map(String::as_str).collect();
        let mut name_owners: HashMap<&str, Vec<&str>> = HashMap::new();
        for f in files {
            name_owners.entry(file_name(f)).or_default().push(f);
        }
        let by_name: HashMap<&str, &str> = name_owners
            .into_iter()
            .filter(|(_, owners)| owners.len() == 1)
            .map(|(name, owners)| (name, owners[0]))
            .collect();

        let mut index = Self::default();
        for dir in &config.analysis_dirs {
            let dir = root.join(dir);
            if !dir.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&dir).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
                let path = entry.path();
                let is_analysis = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|ext| config.analysis_extensions.iter().any(|a| a.eq_ignore_ascii_case(ext)));
                if !entry.file_type().is_file() || !is_analysis {
                    continue;
                }
                let text = match std::fs::read(path) {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable analysis file");
                        continue;
                    }
                };
                index.documents += 1;
                for line in text.lines() {
                    for file in mentioned_files(line, &by_path, &by_name) {
                        *index.lines.entry(file.to_string()).or_default() += 1;
                    }
                }
            }
        }
        debug!(documents = index.documents, files_mentioned = index.lines.len(), "built analysis index");
        index
    }

    pub fn lines_for(&self, file: &str) -> u32 {
        self.lines.get(file).copied().unwrap_or(0)
    }

    pub fn documents(&self) -> usize {
        self.documents
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Indexed files one analysis line mentions; each counts once per line.
fn mentioned_files<'a>(line: &str, by_path: &HashSet<&'a str>, by_name: &HashMap<&str, &'a str>) -> BTreeSet<&'a str> {
    let mut out = BTreeSet::new();
    let Some(re) = mention_re() else {
        return out;
    };
    for m in re.find_iter(line) {
        let token = m.as_str().replace('\\', "/");
        let token = token.trim_start_matches("./").trim_end_matches('.');
        if let Some(hit) = suffix_match(token, by_path) {
            out.insert(hit);
        } else if !token.contains('/') {
            if let Some(hit) = by_name.get(token) {
                out.insert(*hit);
            }
        }
    }
    out
}

/// The token itself or its longest `/`-aligned suffix that is indexed.
fn suffix_match<'a>(token: &str, by_path: &HashSet<&'a str>) -> Option<&'a str> {
    if let Some(hit) = by_path.get(token) {
        return Some(*hit);
    }
    token
        .match_indices('/')
        .map(|(i, _)| &token[i + 1..])
        .find_map(|suffix| by_path.get(suffix).copied())
}

/// Recompute and store coverage for every indexed file.
pub fn compute_coverage(store: &GraphStore, root: &Path, config: &CoverageConfig) -> Result<Vec<CoverageRecord>> {
    let files = store.all_files()?;
    let paths: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
    let index = AnalysisIndex::build(root, config, &paths);

    let records: Vec<CoverageRecord> = files
        .iter()
        .map(|f| {
            let analysis_lines = index.lines_for(&f.path);
            let (required, status) = coverage_status(f.line_count, analysis_lines, config.lines_per_analysis_line);
            CoverageRecord {
                file_path: f.path.clone(),
                source_lines: f.line_count,
                analysis_lines,
                required,
                status,
            }
        })
        .collect();
    store.replace_coverage(&records)?;
    Ok(records)
}

// ---------------------------------------------------------------------------
// Gap triage
// ---------------------------------------------------------------------------

/// Triage severity of a coverage gap, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GapSeverity {
    Critical,
    Important,
    Minor,
    Test,
}

impl GapSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Important => "important",
            Self::Minor => "minor",
            Self::Test => "test",
        }
    }
}

static TEST_FILE_RES: OnceLock<Vec<Regex>> = OnceLock::new();

fn test_file_res() -> &'static [Regex] {
    TEST_FILE_RES.get_or_init(|| {
        [
            r"Tests?\.(cs|js|ts|tsx|java)$",
            r"\.(test|spec)\.(js|ts|tsx|jsx)$",
            r"^test_.*\.py$",
            r"_test\.(py|go)$",
            r"_tests?\.rs$",
        ]
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = p, error = %e, "test-file pattern failed to compile");
                None
            }
        })
        .collect()
    })
}

pub fn is_test_file(path: &str) -> bool {
    let name = file_name(path);
    test_file_res().iter().any(|re| re.is_match(name))
}

/// Severity for a file that is not adequately covered.
pub fn classify_gap(record: &CoverageRecord) -> GapSeverity {
    if is_test_file(&record.file_path) {
        return GapSeverity::Test;
    }
    let deficit = record.required.saturating_sub(record.analysis_lines);
    match record.status {
        CoverageStatus::Missing if record.source_lines > 200 => GapSeverity::Critical,
        CoverageStatus::Missing => GapSeverity::Important,
        CoverageStatus::Shallow if deficit > 5 || record.source_lines > 500 => GapSeverity::Critical,
        CoverageStatus::Shallow if deficit > 2 || record.source_lines > 200 => GapSeverity::Important,
        _ => GapSeverity::Minor,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageGap {
    #[serde(flatten)]
    pub record: CoverageRecord,
    pub deficit: u32,
    pub severity: GapSeverity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TriageBucket {
    pub files: usize,
    pub source_lines: u64,
    pub missing_lines: u64,
}

// ---------------------------------------------------------------------------
// Shared symbols
// ---------------------------------------------------------------------------

/// A symbol that two or more other files reach through resolved edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedSymbol {
    pub symbol_id: String,
    pub name: String,
    pub defined_in: String,
    pub callers: Vec<String>,
}

pub const SHARED_SYMBOL_MIN_CALLERS: usize = 2;

pub fn shared_symbols(store: &GraphStore) -> Result<Vec<SharedSymbol>> {
    let symbols: HashMap<String, (String, String, SymbolKind)> = store
        .all_symbols()?
        .into_iter()
        .map(|s| (s.id, (s.name, s.file_path, s.kind)))
        .collect();

    let mut callers: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let edges = store.all_edges()?;
    for e in edges.iter().filter(|e| e.resolved && e.kind != EdgeKind::Import) {
        let Some(target) = e.target.as_deref() else {
            continue;
        };
        let Some((_, defined_in, kind)) = symbols.get(target) else {
            continue;
        };
        if matches!(kind, SymbolKind::Module | SymbolKind::Import) || *defined_in == e.file_path {
            continue;
        }
        callers.entry(target).or_default().insert(e.file_path.as_str());
    }

    let mut shared: Vec<SharedSymbol> = callers
        .into_iter()
        .filter(|(_, files)| files.len() >= SHARED_SYMBOL_MIN_CALLERS)
        .filter_map(|(id, files)| {
            let (name, defined_in, _) = symbols.get(id)?;
            Some(SharedSymbol {
                symbol_id: id.to_string(),
                name: name.clone(),
                defined_in: defined_in.clone(),
                callers: files.into_iter().map(str::to_string).collect(),
            })
        })
        .collect();
    shared.sort_by(|a, b| b.callers.len().cmp(&a.callers.len()).then_with(|| a.symbol_id.cmp(&b.symbol_id)));
    Ok(shared)
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoverageReport {
    pub files: usize,
    pub adequate: usize,
    pub shallow: usize,
    pub missing: usize,
    pub gaps: Vec<CoverageGap>,
    pub triage: BTreeMap<GapSeverity, TriageBucket>,
    pub shared_symbols: Vec<SharedSymbol>,
}

/// Build the itemized report from stored coverage and edges.
pub fn coverage_report(store: &GraphStore) -> Result<CoverageReport> {
    let records = store.coverage()?;
    let mut report = CoverageReport {
        files: records.len(),
        ..CoverageReport::default()
    };
    for r in records {
        match r.status {
            CoverageStatus::Adequate => {
                report.adequate += 1;
                continue;
            }
            CoverageStatus::Shallow => report.shallow += 1,
            CoverageStatus::Missing => report.missing += 1,
        }
        let severity = classify_gap(&r);
        let deficit = r.required.saturating_sub(r.analysis_lines);
        let bucket = report.triage.entry(severity).or_default();
        bucket.files += 1;
        bucket.source_lines += u64::from(r.source_lines);
        bucket.missing_lines += u64::from(deficit);
        report.gaps.push(CoverageGap {
            record: r,
            deficit,
            severity,
        });
    }
    report.gaps.sort_by(|a, b| {
        (a.severity, std::cmp::Reverse(a.deficit), std::cmp::Reverse(a.record.source_lines), &a.record.file_path)
            .cmp(&(b.severity, std::cmp::Reverse(b.deficit), std::cmp::Reverse(b.record.source_lines), &b.record.file_path))
    });
    report.shared_symbols = shared_symbols(store)?;
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(1433, 1, 29, CoverageStatus::Shallow ; "large file one line")]
    #[test_case(1433, 0, 29, CoverageStatus::Missing ; "large file nothing")]
    #[test_case(1433, 29, 29, CoverageStatus::Adequate ; "large file exact")]
    #[test_case(50, 1, 1, CoverageStatus::Adequate ; "boundary fifty")]
    #[test_case(51, 1, 2, CoverageStatus::Shallow ; "boundary fifty one")]
    #[test_case(0, 0, 0, CoverageStatus::Missing ; "empty file")]
    fn formula(lines: u32, analysis: u32, required: u32, status: CoverageStatus) {
        assert_eq!(coverage_status(lines, analysis, 50), (required, status));
    }

    fn record(path: &str, source: u32, analysis: u32) -> CoverageRecord {
        let (required, status) = coverage_status(source, analysis, 50);
        CoverageRecord {
            file_path: path.into(),
            source_lines: source,
            analysis_lines: analysis,
            required,
            status,
        }
    }

    #[test_case("src/orders.ts", 300, 0, GapSeverity::Critical ; "big missing")]
    #[test_case("src/orders.ts", 120, 0, GapSeverity::Important ; "small missing")]
    #[test_case("src/orders.ts", 1433, 1, GapSeverity::Critical ; "big shallow")]
    #[test_case("src/orders.ts", 250, 2, GapSeverity::Important ; "medium shallow")]
    #[test_case("src/orders.ts", 120, 2, GapSeverity::Minor ; "small shallow")]
    #[test_case("src/orders.test.ts", 900, 0, GapSeverity::Test ; "test file")]
    #[test_case("pkg/store_test.go", 900, 0, GapSeverity::Test ; "go test file")]
    fn triage(path: &str, source: u32, analysis: u32, expected: GapSeverity) {
        assert_eq!(classify_gap(&record(path, source, analysis)), expected);
    }

    #[test]
    fn analysis_lines_count_path_and_unique_name_mentions() {
        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path().join("docs/analysis");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(
            docs.join("orders.md"),
            "# Orders\n\
             `src/api/orders.ts` creates orders.\n\
             See orders.ts:42 for validation.\n\
             index.ts is ambiguous.\n\
             Unrelated line.\n",
        )
        .unwrap();
        std::fs::write(docs.join("notes.txt"), "src/api/orders.ts\n").unwrap();

        let files = vec![
            "src/api/orders.ts".to_string(),
            "src/api/index.ts".to_string(),
            "src/web/index.ts".to_string(),
        ];
        let index = AnalysisIndex::build(dir.path(), &CoverageConfig::default(), &files);
        assert_eq!(index.documents(), 1);
        assert_eq!(index.lines_for("src/api/orders.ts"), 2);
        assert_eq!(index.lines_for("src/api/index.ts"), 0);
    }

    #[test]
    fn longer_paths_match_by_suffix() {
        let by_path: HashSet<&str> = ["src/a.ts"].into();
        assert_eq!(suffix_match("repo/src/a.ts", &by_path), Some("src/a.ts"));
        assert_eq!(suffix_match("src/b.ts", &by_path), None);
    }

    #[test]
    fn missing_analysis_dir_counts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let index = AnalysisIndex::build(dir.path(), &CoverageConfig::default(), &["a.py".to_string()]);
        assert_eq!(index.lines_for("a.py"), 0);
    }
}
