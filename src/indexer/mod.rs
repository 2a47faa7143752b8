//! Indexer: walk the tree, parse files, extract symbols, and write them to
//! the graph.

pub mod extractor;
pub mod parser;
pub mod pipeline;
pub mod walker;

pub use extractor::{extract, Extraction};
pub use parser::CodeParser;
pub use pipeline::{analyze_bytes, index_project};
pub use walker::{walk_sources, SourceFile};
