//! Graph layer: SQLite-backed store, entry/outcome designation, and the
//! pathway tracer.

pub mod designate;
pub mod store;
pub mod tracer;

pub use store::{GraphStats, GraphStore};
