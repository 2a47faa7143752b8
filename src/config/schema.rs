//! Configuration data structures for codetrace.
//!
//! Defines the YAML config format. Every field has a serde default so a
//! partial file (or no file at all) yields a complete configuration.

use serde::{Deserialize, Serialize};

use crate::types::EdgeKind;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for codetrace.
///
/// Loaded from YAML files and environment variables by
/// [`crate::config::loader::load_config`], then adjusted by CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CodeTraceConfig {
    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub resolution: ResolutionConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub trace: TraceConfig,

    #[serde(default)]
    pub coverage: CoverageConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

// ---------------------------------------------------------------------------
// IndexConfig
// ---------------------------------------------------------------------------

/// File selection and batching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory names or path substrings to skip, on top of `.gitignore`.
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    /// Files larger than this are recorded unparsed instead of parsed.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Files per store transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Worker threads for extraction and tracing; 0 uses the rayon default.
    #[serde(default)]
    pub workers: usize,

    /// Fraction of a file's bytes that may sit under syntax-error nodes
    /// before the file counts as unparsable.
    #[serde(default = "default_max_error_ratio")]
    pub max_error_ratio: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            exclude: default_exclude(),
            max_file_bytes: default_max_file_bytes(),
            batch_size: default_batch_size(),
            workers: 0,
            max_error_ratio: default_max_error_ratio(),
        }
    }
}

// ---------------------------------------------------------------------------
// ResolutionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Callee names that are runtime builtins; no edge is emitted for them.
    #[serde(default = "default_ignore_callees")]
    pub ignore_callees: Vec<String>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            ignore_callees: default_ignore_callees(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProbeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Connection categories to skip entirely.
    #[serde(default)]
    pub disabled_categories: Vec<EdgeKind>,
}

impl ProbeConfig {
    pub fn is_enabled(&self, kind: EdgeKind) -> bool {
        !self.disabled_categories.contains(&kind)
    }
}

// ---------------------------------------------------------------------------
// TraceConfig
// ---------------------------------------------------------------------------

/// Pathway tracer limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Maximum edges in one pathway.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Maximum finished branches per entry point.
    #[serde(default = "default_max_branches")]
    pub max_branches_per_entry: usize,

    /// Edge kinds the tracer follows.
    #[serde(default = "default_follow")]
    pub follow: Vec<EdgeKind>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_branches_per_entry: default_max_branches(),
            follow: default_follow(),
        }
    }
}

// ---------------------------------------------------------------------------
// CoverageConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageConfig {
    /// Source lines that one line of analysis is expected to cover.
    #[serde(default = "default_lines_per_analysis_line")]
    pub lines_per_analysis_line: u32,

    /// Directories (relative to the project root) holding analysis output.
    #[serde(default = "default_analysis_dirs")]
    pub analysis_dirs: Vec<String>,

    /// File extensions counted as analysis output.
    #[serde(default = "default_analysis_extensions")]
    pub analysis_extensions: Vec<String>,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            lines_per_analysis_line: default_lines_per_analysis_line(),
            analysis_dirs: default_analysis_dirs(),
            analysis_extensions: default_analysis_extensions(),
        }
    }
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database path; relative paths resolve against the project root.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Whole-batch retries when the database is busy.
    #[serde(default = "default_busy_retries")]
    pub busy_retries: u32,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_retries: default_busy_retries(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_exclude() -> Vec<String> {
    [
        "node_modules",
        ".git",
        "dist",
        "build",
        "vendor",
        "__pycache__",
        ".venv",
        "venv",
        "target",
        "bin",
        "obj",
        ".next",
        "coverage",
        ".codetrace",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_bytes() -> u64 {
    2 * 1024 * 1024
}

fn default_batch_size() -> usize {
    50
}

fn default_max_error_ratio() -> f64 {
    0.2
}

fn default_ignore_callees() -> Vec<String> {
    [
        // ECMAScript
        "require", "console", "log", "setTimeout", "setInterval", "clearTimeout",
        "parseInt", "parseFloat", "String", "Number", "Boolean", "Array", "Object",
        "Promise", "JSON", "stringify", "parse", "push", "map", "filter", "reduce",
        "forEach", "then", "catch", "resolve", "reject", "toString", "includes",
        // Python
        "print", "len", "range", "str", "int", "float", "dict", "list", "set",
        "tuple", "isinstance", "super", "enumerate", "zip", "sorted", "open",
        "append", "format", "get", "items", "keys", "values",
        // Go / Rust / C family
        "make", "new", "panic", "fmt", "Println", "Printf", "Sprintf", "Errorf",
        "println", "vec", "unwrap", "clone", "into", "collect", "iter",
        "printf", "malloc", "free", "sizeof", "memcpy", "strlen",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_depth() -> usize {
    32
}

fn default_max_branches() -> usize {
    512
}

fn default_follow() -> Vec<EdgeKind> {
    let mut kinds = vec![EdgeKind::Call];
    kinds.extend(EdgeKind::CONNECTION_KINDS);
    kinds
}

fn default_lines_per_analysis_line() -> u32 {
    50
}

fn default_analysis_dirs() -> Vec<String> {
    vec!["docs/analysis".to_string()]
}

fn default_analysis_extensions() -> Vec<String> {
    vec!["md".to_string(), "markdown".to_string()]
}

fn default_db_path() -> String {
    ".codetrace/graph.db".to_string()
}

fn default_busy_retries() -> u32 {
    5
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
