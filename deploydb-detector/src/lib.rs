//! Change detection for `deploydb-detector`.
//!
//! `detect(...)` turns the diff between the last deployed revision and the
//! current head into the ordered list of scripts a pass must run. It owns no
//! state: the result depends only on the checkout, the two revisions and the
//! files on disk.

use std::collections::HashSet;
use std::path::Path;

use deploydb_core::{classify, ChangedFile, ClassifyError, SourceControl, SourceError};
use thiserror::Error;

pub mod git;

pub use git::GitCli;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Errors from change detection.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("source control error: {0}")]
    Source(#[from] SourceError),

    #[error(transparent)]
    Classify(#[from] ClassifyError),
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Ordered scripts changed between `last` and `head`.
///
/// A missing pointer (first run) or an unchanged head yields an empty list:
/// deployment starts from the current head, never from repository history.
/// Deleted files are not deployed, and files that no longer exist under
/// `checkout` are dropped. The result is sorted by object-type priority,
/// then by path.
pub fn detect(
    source: &dyn SourceControl,
    checkout: &Path,
    last: Option<&str>,
    head: &str,
) -> Result<Vec<ChangedFile>, DetectError> {
    let Some(last) = last else {
        tracing::info!("no deployment pointer yet; {head} becomes the baseline");
        return Ok(Vec::new());
    };
    if last == head {
        return Ok(Vec::new());
    }

    let entries = source.diff(checkout, last, head)?;
    let mut seen = HashSet::new();
    let mut changes = Vec::new();

    for entry in entries {
        if !entry.kind.is_deployable() {
            tracing::debug!("skipping deleted path: {}", entry.path);
            continue;
        }
        let Some(file) = classify(&entry.path)? else {
            tracing::debug!("ignoring non-deployable path: {}", entry.path);
            continue;
        };
        if !checkout.join(&file.path).exists() {
            tracing::debug!("changed file no longer on disk: {}", file.path);
            continue;
        }
        if seen.insert(file.path.clone()) {
            changes.push(file);
        }
    }

    sort_for_execution(&mut changes);
    Ok(changes)
}

/// Sort by execution priority; ties broken by path.
pub fn sort_for_execution(files: &mut [ChangedFile]) {
    files.sort_by(|a, b| {
        a.priority()
            .cmp(&b.priority())
            .then_with(|| a.path.cmp(&b.path))
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
