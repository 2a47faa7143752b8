//! Version-control collaborator: change sets between revisions.
//!
//! Shells out to the `git` binary. Every user-supplied argument goes
//! through [`validate_input`] first so a revision like `--output=x` cannot
//! be smuggled in as an option.

use std::path::Path;
use std::process::Command;

use serde::Serialize;
use tracing::debug;

use crate::error::{CodeTraceError, Result};

/// How one path changed between two revisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed { from: String },
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed { .. } => "renamed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileChange {
    pub path: String,
    #[serde(flatten)]
    pub kind: ChangeKind,
}

impl FileChange {
    pub fn new(path: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Reject arguments git could read as options, and embedded NULs.
pub fn validate_input(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CodeTraceError::Git(format!("{what} is empty")));
    }
    if value.starts_with('-') {
        return Err(CodeTraceError::Git(format!("{what} cannot start with '-'")));
    }
    if value.contains('\0') {
        return Err(CodeTraceError::Git(format!("{what} cannot contain null bytes")));
    }
    Ok(())
}

/// Run git in `repo` and return stdout.
pub fn run_git(repo: &Path, args: &[&str]) -> Result<String> {
    Ok(String::from_utf8_lossy(&run_git_raw(repo, args)?).into_owned())
}

fn run_git_raw(repo: &Path, args: &[&str]) -> Result<Vec<u8>> {
    debug!(?args, "git");
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .map_err(|e| CodeTraceError::Git(format!("failed to run git: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CodeTraceError::Git(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }
    Ok(output.stdout)
}

/// True when `path` is inside a git work tree.
pub fn is_repo(path: &Path) -> bool {
    run_git(path, &["rev-parse", "--is-inside-work-tree"]).is_ok_and(|out| out.trim() == "true")
}

/// Full hash of `HEAD`.
pub fn head_commit(repo: &Path) -> Result<String> {
    resolve_revision(repo, "HEAD")
}

/// Full hash of any revision.
pub fn resolve_revision(repo: &Path, rev: &str) -> Result<String> {
    validate_input(rev, "revision")?;
    let spec = format!("{rev}^{{commit}}");
    Ok(run_git(repo, &["rev-parse", "--verify", "--quiet", &spec])?.trim().to_string())
}

/// Paths changed from `from` to `to`, with renames detected.
pub fn diff_name_status(repo: &Path, from: &str, to: &str) -> Result<Vec<FileChange>> {
    validate_input(from, "from revision")?;
    validate_input(to, "to revision")?;
    let output = run_git(repo, &["diff", "--name-status", "-M", "--no-color", from, to, "--"])?;
    Ok(parse_name_status(&output))
}

/// Raw bytes of `path` as of revision `rev`.
pub fn show_file(repo: &Path, rev: &str, path: &str) -> Result<Vec<u8>> {
    validate_input(rev, "revision")?;
    validate_input(path, "path")?;
    let object = format!("{rev}:{path}");
    run_git_raw(repo, &["show", &object])
}

/// Parse `git diff --name-status` output. Copies count as additions and
/// type changes as modifications; unknown status letters are skipped.
pub fn parse_name_status(output: &str) -> Vec<FileChange> {
    let mut changes = Vec::new();
    for line in output.lines() {
        let mut parts = line.split('\t');
        let (Some(status), Some(first)) = (parts.next(), parts.next()) else {
            continue;
        };
        let second = parts.next();
        let change = match (status.as_bytes().first(), second) {
            (Some(b'A'), _) => FileChange::new(first, ChangeKind::Added),
            (Some(b'M' | b'T'), _) => FileChange::new(first, ChangeKind::Modified),
            (Some(b'D'), _) => FileChange::new(first, ChangeKind::Deleted),
            (Some(b'R'), Some(to)) => FileChange::new(to, ChangeKind::Renamed { from: first.to_string() }),
            (Some(b'C'), Some(to)) => FileChange::new(to, ChangeKind::Added),
            _ => continue,
        };
        changes.push(change);
    }
    changes
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
