//! Coverage audit and change-driven reindexing.

pub mod coverage;
pub mod reindex;

pub use coverage::{compute_coverage, coverage_report, CoverageReport};
pub use reindex::{reindex, ReindexOptions, ReindexReport};
