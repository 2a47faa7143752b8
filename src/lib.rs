//! codetrace: an incrementally updated code reference graph.
//!
//! Source files are parsed into symbols and call/import references, probed
//! for indirect connections (events, queues, routes and the like), and
//! stored in SQLite. From that graph the tracer follows every entry point to
//! the final outcomes it can reach, and the auditor measures how much
//! written analysis covers each file.

pub mod audit;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod git;
pub mod graph;
pub mod indexer;
pub mod observability;
pub mod probe;
pub mod resolution;
pub mod types;

pub use error::{CodeTraceError, Result};
pub use graph::store::GraphStore;
