//! Core domain types for codetrace.
//!
//! Everything persisted in `graph.db` has a typed counterpart here. Enums
//! carry `as_str`/`from_str_loose` pairs so the database stores stable
//! lowercase strings and reads them back without a serde round trip.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Supported source languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    TypeScript,
    Tsx,
    JavaScript,
    Jsx,
    Python,
    Go,
    Rust,
    Java,
    C,
    Cpp,
    CSharp,
}

impl Language {
    /// Map a file extension (including the dot) to a language.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            ".ts" | ".mts" | ".cts" => Some(Self::TypeScript),
            ".tsx" => Some(Self::Tsx),
            ".js" | ".mjs" | ".cjs" => Some(Self::JavaScript),
            ".jsx" => Some(Self::Jsx),
            ".py" => Some(Self::Python),
            ".go" => Some(Self::Go),
            ".rs" => Some(Self::Rust),
            ".java" => Some(Self::Java),
            ".c" | ".h" => Some(Self::C),
            ".cpp" | ".cc" | ".cxx" | ".hpp" | ".hxx" | ".hh" => Some(Self::Cpp),
            ".cs" => Some(Self::CSharp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::JavaScript => "javascript",
            Self::Jsx => "jsx",
            Self::Python => "python",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
        }
    }

    /// Parse from a string (case-insensitive).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "typescript" | "ts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "javascript" | "js" => Some(Self::JavaScript),
            "jsx" => Some(Self::Jsx),
            "python" | "py" => Some(Self::Python),
            "go" | "golang" => Some(Self::Go),
            "rust" | "rs" => Some(Self::Rust),
            "java" => Some(Self::Java),
            "c" => Some(Self::C),
            "cpp" | "c++" => Some(Self::Cpp),
            "csharp" | "c#" | "c_sharp" => Some(Self::CSharp),
            _ => None,
        }
    }

    /// True for the JavaScript family, which shares one import syntax.
    pub fn is_ecmascript(&self) -> bool {
        matches!(
            self,
            Self::TypeScript | Self::Tsx | Self::JavaScript | Self::Jsx
        )
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SymbolKind
// ---------------------------------------------------------------------------

/// Kinds of named code entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    /// One per file; owns top-level call sites and imports.
    Module,
    Function,
    Method,
    Class,
    Struct,
    Interface,
    Enum,
    Trait,
    TypeAlias,
    Constant,
    Variable,
    Route,
    Import,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Interface => "interface",
            Self::Enum => "enum",
            Self::Trait => "trait",
            Self::TypeAlias => "type_alias",
            Self::Constant => "constant",
            Self::Variable => "variable",
            Self::Route => "route",
            Self::Import => "import",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "module" | "file" => Some(Self::Module),
            "function" | "fn" => Some(Self::Function),
            "method" => Some(Self::Method),
            "class" => Some(Self::Class),
            "struct" => Some(Self::Struct),
            "interface" => Some(Self::Interface),
            "enum" => Some(Self::Enum),
            "trait" => Some(Self::Trait),
            "type_alias" | "type" => Some(Self::TypeAlias),
            "constant" | "const" => Some(Self::Constant),
            "variable" | "var" => Some(Self::Variable),
            "route" => Some(Self::Route),
            "import" => Some(Self::Import),
            _ => None,
        }
    }

    /// Kinds whose bodies can contain call sites.
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function | Self::Method | Self::Route)
    }

    /// Kinds a call site can resolve to.
    pub fn is_call_target(&self) -> bool {
        matches!(
            self,
            Self::Function | Self::Method | Self::Class | Self::Struct | Self::Route
        )
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EdgeKind
// ---------------------------------------------------------------------------

/// Kinds of directed relationships.
///
/// `Call` and `Import` come from static resolution; the connection kinds
/// come from the prober's idiom catalog; `Unknown` marks a call site that
/// could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Call,
    Import,
    Event,
    PubSub,
    Ipc,
    DependencyInjection,
    ConventionRouting,
    DispatchTable,
    Webhook,
    FileWatcher,
    MessageQueue,
    Http,
    SharedStore,
    Unknown,
}

impl EdgeKind {
    /// The eleven connection categories the prober understands.
    pub const CONNECTION_KINDS: [EdgeKind; 11] = [
        Self::Event,
        Self::PubSub,
        Self::Ipc,
        Self::DependencyInjection,
        Self::ConventionRouting,
        Self::DispatchTable,
        Self::Webhook,
        Self::FileWatcher,
        Self::MessageQueue,
        Self::Http,
        Self::SharedStore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Import => "import",
            Self::Event => "event",
            Self::PubSub => "pubsub",
            Self::Ipc => "ipc",
            Self::DependencyInjection => "dependency_injection",
            Self::ConventionRouting => "convention_routing",
            Self::DispatchTable => "dispatch_table",
            Self::Webhook => "webhook",
            Self::FileWatcher => "file_watcher",
            Self::MessageQueue => "message_queue",
            Self::Http => "http",
            Self::SharedStore => "shared_store",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "call" | "calls" => Some(Self::Call),
            "import" | "imports" => Some(Self::Import),
            "event" => Some(Self::Event),
            "pubsub" | "pub_sub" => Some(Self::PubSub),
            "ipc" => Some(Self::Ipc),
            "dependency_injection" | "di" => Some(Self::DependencyInjection),
            "convention_routing" | "routing" => Some(Self::ConventionRouting),
            "dispatch_table" | "dispatch" => Some(Self::DispatchTable),
            "webhook" => Some(Self::Webhook),
            "file_watcher" | "watcher" => Some(Self::FileWatcher),
            "message_queue" | "queue" => Some(Self::MessageQueue),
            "http" => Some(Self::Http),
            "shared_store" | "store" => Some(Self::SharedStore),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// True for kinds produced by connection probing rather than by the
    /// static resolver.
    pub fn is_connection(&self) -> bool {
        Self::CONNECTION_KINDS.contains(self)
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an edge came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOrigin {
    /// Lexical call/import resolution.
    Static,
    /// Merged from connection probe candidates.
    Probe,
    /// Supplied by a reviewer.
    Manual,
}

impl EdgeOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Probe => "probe",
            Self::Manual => "manual",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "static" => Some(Self::Static),
            "probe" => Some(Self::Probe),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Symbol / Edge
// ---------------------------------------------------------------------------

/// A named code entity with file/line provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: String,
    pub kind: SymbolKind,
    pub name: String,
    /// Dotted container path, e.g. `OrderService.create`.
    pub qualified_name: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub language: Language,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub exported: bool,
}

/// A directed relationship between two symbols.
///
/// `source` always names an existing symbol. `target` is `None` while the
/// edge is unresolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: Option<String>,
    pub kind: EdgeKind,
    pub resolved: bool,
    /// Callee text for calls, event/channel/route key for connections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub file_path: String,
    pub line: u32,
    pub confidence: f64,
    pub origin: EdgeOrigin,
    /// Why an edge is unresolved (e.g. the ambiguous candidate list).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Edge {
    /// Build a resolved edge with a content-derived id.
    #[allow(clippy::too_many_arguments)]
    pub fn resolved(
        kind: EdgeKind,
        source: &str,
        target: &str,
        key: Option<&str>,
        file_path: &str,
        line: u32,
        confidence: f64,
        origin: EdgeOrigin,
    ) -> Self {
        Self {
            id: make_edge_id(kind, source, Some(target), key.unwrap_or("")),
            source: source.to_string(),
            target: Some(target.to_string()),
            kind,
            resolved: true,
            key: key.map(str::to_string),
            file_path: file_path.to_string(),
            line,
            confidence,
            origin,
            detail: None,
        }
    }

    /// Build an unresolved edge; `target` stays null until resolution.
    pub fn unresolved(
        kind: EdgeKind,
        source: &str,
        key: &str,
        file_path: &str,
        line: u32,
        origin: EdgeOrigin,
        detail: Option<String>,
    ) -> Self {
        Self {
            id: make_edge_id(kind, source, None, key),
            source: source.to_string(),
            target: None,
            kind,
            resolved: false,
            key: Some(key.to_string()),
            file_path: file_path.to_string(),
            line,
            confidence: 0.0,
            origin,
            detail,
        }
    }
}

// ---------------------------------------------------------------------------
// Extraction side records
// ---------------------------------------------------------------------------

/// A raw call expression found inside `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub owner: String,
    /// Bare callee name (`save` for `repo.save(x)`).
    pub callee: String,
    /// Receiver text when the call is a member call (`repo`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    pub file_path: String,
    pub line: u32,
}

/// An import statement, owned by its import symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRef {
    pub symbol_id: String,
    pub file_path: String,
    pub specifier: String,
    /// Named bindings; empty for wildcard/default/module imports.
    pub names: Vec<String>,
    pub line: u32,
}

/// Whether a file made it through extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    Parsed,
    Unparsed,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parsed => "parsed",
            Self::Unparsed => "unparsed",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "parsed" => Some(Self::Parsed),
            "unparsed" => Some(Self::Unparsed),
            _ => None,
        }
    }
}

/// Per-file bookkeeping used for coverage and hash-based change detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub language: Language,
    pub content_hash: String,
    pub line_count: u32,
    pub parse_status: ParseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Connection candidates
// ---------------------------------------------------------------------------

/// Which half of a connection a candidate represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSide {
    /// Emits, publishes, sends, registers, calls out.
    Emit,
    /// Listens, subscribes, handles, serves.
    Receive,
}

impl CandidateSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emit => "emit",
            Self::Receive => "receive",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "emit" | "source" => Some(Self::Emit),
            "receive" | "target" => Some(Self::Receive),
            _ => None,
        }
    }
}

/// One half of a non-lexical connection found by probing a single file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionCandidate {
    pub kind: EdgeKind,
    /// Normalised matching key (event name, channel, route pattern).
    pub key: String,
    pub side: CandidateSide,
    /// The enclosing symbol on this side of the connection.
    pub symbol_id: String,
    pub file_path: String,
    pub line: u32,
}

/// A reviewer-supplied answer for an unresolved edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub kind: EdgeKind,
    pub key: String,
    /// Restrict to one emitting symbol; `None` applies to every emitter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

// ---------------------------------------------------------------------------
// Entry points / outcomes
// ---------------------------------------------------------------------------

/// What triggers an entry point from outside the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    HttpRoute,
    CliCommand,
    ScheduledJob,
    UiHandler,
    MessageConsumer,
    Webhook,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpRoute => "http_route",
            Self::CliCommand => "cli_command",
            Self::ScheduledJob => "scheduled_job",
            Self::UiHandler => "ui_handler",
            Self::MessageConsumer => "message_consumer",
            Self::Webhook => "webhook",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "http_route" | "http" | "route" => Some(Self::HttpRoute),
            "cli_command" | "cli" | "command" => Some(Self::CliCommand),
            "scheduled_job" | "cron" | "job" => Some(Self::ScheduledJob),
            "ui_handler" | "ui" => Some(Self::UiHandler),
            "message_consumer" | "consumer" => Some(Self::MessageConsumer),
            "webhook" => Some(Self::Webhook),
            _ => None,
        }
    }
}

/// Externally observable effect produced by a final outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    DbWrite,
    Response,
    Email,
    ExternalCall,
    FileWrite,
    Publish,
}

impl EffectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DbWrite => "db_write",
            Self::Response => "response",
            Self::Email => "email",
            Self::ExternalCall => "external_call",
            Self::FileWrite => "file_write",
            Self::Publish => "publish",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "db_write" | "db" | "database" => Some(Self::DbWrite),
            "response" => Some(Self::Response),
            "email" | "mail" => Some(Self::Email),
            "external_call" | "external" => Some(Self::ExternalCall),
            "file_write" | "file" => Some(Self::FileWrite),
            "publish" => Some(Self::Publish),
            _ => None,
        }
    }
}

/// Whether a designation was detected from code or declared by a reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesignationOrigin {
    Detected,
    Manual,
}

impl DesignationOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Manual => "manual",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "detected" => Some(Self::Detected),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// A symbol designated as an external trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub id: String,
    pub symbol_id: String,
    pub trigger: TriggerKind,
    pub origin: DesignationOrigin,
    /// Route pattern, command name, schedule, etc.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A symbol designated as an externally observable effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalOutcome {
    pub id: String,
    pub symbol_id: String,
    pub effect: EffectKind,
    pub origin: DesignationOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Role of a manual designation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesignationRole {
    Entry,
    Outcome,
}

impl DesignationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Outcome => "outcome",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "entry" | "entry_point" => Some(Self::Entry),
            "outcome" | "final_outcome" => Some(Self::Outcome),
            _ => None,
        }
    }
}

/// A reviewer-declared entry point or outcome, addressed by file and
/// qualified name so it survives symbol re-extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualDesignation {
    pub role: DesignationRole,
    pub file_path: String,
    pub qualified_name: String,
    /// A [`TriggerKind`] or [`EffectKind`] string depending on `role`.
    pub kind: String,
}

// ---------------------------------------------------------------------------
// Pathways
// ---------------------------------------------------------------------------

/// Lifecycle of a traced pathway.
///
/// `Valid` is the only state that does not need a reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathwayStatus {
    Valid,
    Broken,
    Changed,
    Unreachable,
}

impl PathwayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Broken => "broken",
            Self::Changed => "changed",
            Self::Unreachable => "unreachable",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "valid" => Some(Self::Valid),
            "broken" => Some(Self::Broken),
            "changed" => Some(Self::Changed),
            "unreachable" => Some(Self::Unreachable),
            _ => None,
        }
    }

    pub fn needs_review(&self) -> bool {
        !matches!(self, Self::Valid)
    }
}

impl std::fmt::Display for PathwayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a traced branch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Outcome,
    DeadEnd,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outcome => "outcome",
            Self::DeadEnd => "dead_end",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "outcome" => Some(Self::Outcome),
            "dead_end" => Some(Self::DeadEnd),
            _ => None,
        }
    }
}

/// An ordered chain of edges from one entry point.
///
/// `symbols` has one more element than `steps`: the entry symbol followed
/// by the target of each step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pathway {
    pub id: String,
    pub entry_point_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_id: Option<String>,
    pub status: PathwayStatus,
    pub termination: Termination,
    pub steps: Vec<String>,
    pub symbols: Vec<String>,
}

// ---------------------------------------------------------------------------
// Coverage
// ---------------------------------------------------------------------------

/// Coverage verdict for one source file, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStatus {
    Missing,
    Shallow,
    Adequate,
}

impl CoverageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Shallow => "shallow",
            Self::Adequate => "adequate",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "missing" => Some(Self::Missing),
            "shallow" => Some(Self::Shallow),
            "adequate" => Some(Self::Adequate),
            _ => None,
        }
    }
}

impl std::fmt::Display for CoverageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRecord {
    pub file_path: String,
    pub source_lines: u32,
    pub analysis_lines: u32,
    pub required: u32,
    pub status: CoverageStatus,
}

// ---------------------------------------------------------------------------
// Validation issues
// ---------------------------------------------------------------------------

/// Graph validation findings that always need an explicit answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    OrphanEntryPoint,
    UnreachableOutcome,
    CycleDetected,
    DepthLimitExceeded,
    BranchLimitExceeded,
    DeadEnd,
    UnparsedFile,
    AmbiguousResolution,
    DanglingDesignation,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrphanEntryPoint => "orphan_entry_point",
            Self::UnreachableOutcome => "unreachable_outcome",
            Self::CycleDetected => "cycle_detected",
            Self::DepthLimitExceeded => "depth_limit_exceeded",
            Self::BranchLimitExceeded => "branch_limit_exceeded",
            Self::DeadEnd => "dead_end",
            Self::UnparsedFile => "unparsed_file",
            Self::AmbiguousResolution => "ambiguous_resolution",
            Self::DanglingDesignation => "dangling_designation",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "orphan_entry_point" => Some(Self::OrphanEntryPoint),
            "unreachable_outcome" => Some(Self::UnreachableOutcome),
            "cycle_detected" => Some(Self::CycleDetected),
            "depth_limit_exceeded" => Some(Self::DepthLimitExceeded),
            "branch_limit_exceeded" => Some(Self::BranchLimitExceeded),
            "dead_end" => Some(Self::DeadEnd),
            "unparsed_file" => Some(Self::UnparsedFile),
            "ambiguous_resolution" => Some(Self::AmbiguousResolution),
            "dangling_designation" => Some(Self::DanglingDesignation),
            _ => None,
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    /// The entity the issue is about (entry point, symbol, file).
    pub subject: String,
    pub detail: String,
}

impl ValidationIssue {
    pub fn new(kind: IssueKind, subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// FileGraph
// ---------------------------------------------------------------------------

/// Everything extraction and probing produced for one file. This is the
/// unit the store replaces atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileGraph {
    pub record: FileRecord,
    pub symbols: Vec<Symbol>,
    pub call_sites: Vec<CallSite>,
    pub imports: Vec<ImportRef>,
    pub candidates: Vec<ConnectionCandidate>,
    pub entry_points: Vec<EntryPoint>,
    pub outcomes: Vec<FinalOutcome>,
}

impl FileGraph {
    /// A file that failed extraction: recorded, but contributes nothing.
    pub fn unparsed(
        path: &str,
        language: Language,
        content_hash: String,
        line_count: u32,
        error: String,
    ) -> Self {
        Self {
            record: FileRecord {
                path: path.to_string(),
                language,
                content_hash,
                line_count,
                parse_status: ParseStatus::Unparsed,
                parse_error: Some(error),
            },
            symbols: Vec::new(),
            call_sites: Vec::new(),
            imports: Vec::new(),
            candidates: Vec::new(),
            entry_points: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    /// Rewrite symbol ids per `remap`, carrying every reference inside the
    /// graph along. Ids absent from `remap` are kept.
    pub fn with_symbol_ids(&self, remap: &HashMap<String, String>) -> Self {
        let id = |old: &str| remap.get(old).cloned().unwrap_or_else(|| old.to_string());
        let mut graph = self.clone();
        for s in &mut graph.symbols {
            s.id = id(&s.id);
        }
        for c in &mut graph.call_sites {
            c.owner = id(&c.owner);
        }
        for i in &mut graph.imports {
            i.symbol_id = id(&i.symbol_id);
        }
        for c in &mut graph.candidates {
            c.symbol_id = id(&c.symbol_id);
        }
        for ep in &mut graph.entry_points {
            ep.symbol_id = id(&ep.symbol_id);
            ep.id = make_entry_point_id(&ep.symbol_id, ep.trigger);
        }
        for fo in &mut graph.outcomes {
            fo.symbol_id = id(&fo.symbol_id);
            fo.id = make_outcome_id(&fo.symbol_id, fo.effect);
        }
        graph
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Build a deterministic symbol id: `{kind}:{filePath}:{qualifiedName}`.
///
/// Line numbers are deliberately absent so an edit above a symbol does not
/// change its identity.
pub fn make_symbol_id(kind: SymbolKind, file_path: &str, qualified_name: &str) -> String {
    format!("{}:{}:{}", kind.as_str(), file_path, qualified_name)
}

/// Id of the per-file module symbol.
pub fn module_symbol_id(file_path: &str) -> String {
    make_symbol_id(SymbolKind::Module, file_path, "<module>")
}

/// SHA-256 over the parts separated by a unit separator, hex encoded and
/// truncated to 16 bytes.
pub fn stable_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Edge dedup key: kind, endpoints, and key. Location is not part of the
/// identity, so the same logical edge found twice collapses to one row.
pub fn make_edge_id(kind: EdgeKind, source: &str, target: Option<&str>, key: &str) -> String {
    format!(
        "e:{}",
        stable_hash(&[kind.as_str(), source, target.unwrap_or("<unresolved>"), key])
    )
}

pub fn make_entry_point_id(symbol_id: &str, trigger: TriggerKind) -> String {
    format!("ep:{}", stable_hash(&[symbol_id, trigger.as_str()]))
}

pub fn make_outcome_id(symbol_id: &str, effect: EffectKind) -> String {
    format!("fo:{}", stable_hash(&[symbol_id, effect.as_str()]))
}

/// Pathway identity: entry point, ordered steps, and where it ended.
pub fn make_pathway_id(entry_point_id: &str, steps: &[String], end: &str) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(steps.len() + 2);
    parts.push(entry_point_id);
    parts.extend(steps.iter().map(String::as_str));
    parts.push(end);
    format!("p:{}", stable_hash(&parts))
}

/// Hex SHA-256 of file content.
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
