//! Connection probing: find the halves of indirect connections (events,
//! queues, routes, ...) in each file, then pair them up across files.

pub mod catalog;
pub mod merge;
pub mod prober;

pub use merge::{merge_candidates, remerge, MergeResult};
pub use prober::{probe_file, ProbeOutput};
