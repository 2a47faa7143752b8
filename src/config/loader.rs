//! Layered configuration loading.
//!
//! Sources, lowest priority first:
//!
//! 1. built-in defaults
//! 2. user config (`<config dir>/codetrace/config.yaml`)
//! 3. project config (`<root>/.codetrace.yaml`) or an explicit `--config` file
//! 4. environment (`CODETRACE_DB`, `CODETRACE_MAX_DEPTH`,
//!    `CODETRACE_BATCH_SIZE`, `CODETRACE_WORKERS`)
//!
//! YAML layers are deep-merged as values before deserializing, so a
//! project file that sets one key does not reset the user file's others.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde_yaml::Value;

use super::schema::CodeTraceConfig;
use crate::error::{CodeTraceError, Result};

/// Project-level config file name.
pub const PROJECT_CONFIG_FILE: &str = ".codetrace.yaml";

/// Load the effective configuration for a project rooted at `root`.
///
/// `explicit` replaces the project file when given; it must exist.
pub fn load_config(root: &Path, explicit: Option<&Path>) -> Result<CodeTraceConfig> {
    let mut merged = Value::Mapping(Default::default());

    if let Some(user) = user_config_path() {
        if user.is_file() {
            tracing::debug!(path = %user.display(), "loading user config");
            deep_merge(&mut merged, read_yaml(&user)?);
        }
    }

    match explicit {
        Some(path) => {
            if !path.is_file() {
                return Err(CodeTraceError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            deep_merge(&mut merged, read_yaml(path)?);
        }
        None => {
            let project = root.join(PROJECT_CONFIG_FILE);
            if project.is_file() {
                tracing::debug!(path = %project.display(), "loading project config");
                deep_merge(&mut merged, read_yaml(&project)?);
            }
        }
    }

    let mut config: CodeTraceConfig = serde_yaml::from_value(merged)?;
    apply_env(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Location of the per-user config file, if the platform has one.
pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "codetrace").map(|dirs| dirs.config_dir().join("config.yaml"))
}

fn read_yaml(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(Value::Mapping(Default::default()));
    }
    serde_yaml::from_str(&text).map_err(|e| {
        CodeTraceError::Config(format!("{}: {e}", path.display()))
    })
}

/// Merge `overlay` into `base`. Mappings merge key by key; everything else
/// is replaced.
fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply environment overrides. `lookup` is injectable for tests.
fn apply_env<F>(config: &mut CodeTraceConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(db) = lookup("CODETRACE_DB") {
        config.store.db_path = db;
    }
    if let Some(v) = lookup("CODETRACE_MAX_DEPTH") {
        config.trace.max_depth = parse_env("CODETRACE_MAX_DEPTH", &v)?;
    }
    if let Some(v) = lookup("CODETRACE_BATCH_SIZE") {
        config.index.batch_size = parse_env("CODETRACE_BATCH_SIZE", &v)?;
    }
    if let Some(v) = lookup("CODETRACE_WORKERS") {
        config.index.workers = parse_env("CODETRACE_WORKERS", &v)?;
    }
    Ok(())
}

fn parse_env(name: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| CodeTraceError::Config(format!("{name} must be an integer, got `{value}`")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn missing_project_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(dir.path(), None).unwrap();
        assert_eq!(config.trace.max_branches_per_entry, 512);
    }

    #[test]
    fn project_file_is_applied() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_CONFIG_FILE),
            "coverage:\n  analysis_dirs: [notes]\n",
        )
        .unwrap();
        let config = load_config(dir.path(), None).unwrap();
        assert_eq!(config.coverage.analysis_dirs, vec!["notes".to_string()]);
        assert_eq!(config.coverage.lines_per_analysis_line, 50);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = load_config(dir.path(), Some(&dir.path().join("nope.yaml"))).unwrap_err();
        assert!(matches!(err, CodeTraceError::Config(_)));
    }

    #[test]
    fn deep_merge_keeps_sibling_keys() {
        let mut base: Value = serde_yaml::from_str("trace:\n  max_depth: 4\n  max_branches_per_entry: 9\n").unwrap();
        let overlay: Value = serde_yaml::from_str("trace:\n  max_depth: 7\n").unwrap();
        deep_merge(&mut base, overlay);
        let config: CodeTraceConfig = serde_yaml::from_value(base).unwrap();
        assert_eq!(config.trace.max_depth, 7);
        assert_eq!(config.trace.max_branches_per_entry, 9);
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> =
            [("CODETRACE_MAX_DEPTH", "3"), ("CODETRACE_DB", "/tmp/x.db")].into();
        let mut config = CodeTraceConfig::default();
        apply_env(&mut config, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.trace.max_depth, 3);
        assert_eq!(config.store.db_path, "/tmp/x.db");
    }

    #[test]
    fn bad_env_value_is_config_error() {
        let mut config = CodeTraceConfig::default();
        let err = apply_env(&mut config, |k| {
            (k == "CODETRACE_WORKERS").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("CODETRACE_WORKERS"));
    }
}
