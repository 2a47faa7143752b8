//! Structured logging and run metrics.
//!
//! - [`init_logging`]: one-time `tracing` subscriber setup with `RUST_LOG` support
//! - [`IndexMetrics`]: counters collected by an index or reindex pass

use std::time::Duration;

use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Initialize structured logging with `RUST_LOG` environment variable support.
///
/// Defaults to `codetrace=info` (or `codetrace=debug` when `verbose`) when
/// `RUST_LOG` is not set. Logs go to stderr so CLI output on stdout stays
/// machine-readable. Subsequent calls are ignored.
pub fn init_logging(verbose: bool) {
    let default = if verbose {
        "codetrace=debug"
    } else {
        "codetrace=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // try_init so double-init in tests doesn't panic
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Counters for one index or reindex pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexMetrics {
    pub duration_ms: u64,
    pub files_seen: usize,
    pub files_indexed: usize,
    pub files_unparsed: usize,
    pub files_deleted: usize,
    pub files_renamed: usize,
    pub symbols: usize,
    pub call_sites: usize,
    pub candidates: usize,
    pub edges_resolved: usize,
    pub edges_unresolved: usize,
    pub pathways: usize,
    pub pathways_broken: usize,
    pub pathways_changed: usize,
    pub issues: usize,
}

impl IndexMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_duration(&mut self, elapsed: Duration) {
        self.duration_ms = elapsed.as_millis() as u64;
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Emit one structured summary line.
    pub fn log(&self, pass: &str) {
        tracing::info!(
            pass,
            duration_ms = self.duration_ms,
            files = self.files_indexed,
            unparsed = self.files_unparsed,
            deleted = self.files_deleted,
            symbols = self.symbols,
            resolved = self.edges_resolved,
            unresolved = self.edges_unresolved,
            pathways = self.pathways,
            issues = self.issues,
            "pass complete"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_does_not_panic() {
        init_logging(false);
        // Second call should also not panic (try_init ignores re-init).
        init_logging(true);
    }

    #[test]
    fn metrics_serialize_all_counters() {
        let mut m = IndexMetrics::new();
        m.files_indexed = 3;
        m.set_duration(Duration::from_millis(42));
        let json = m.to_json();
        assert_eq!(json["files_indexed"], 3);
        assert_eq!(json["duration_ms"], 42);
        assert_eq!(json["pathways_broken"], 0);
    }
}
