//! Source-control capability consumed by the deployment engine.

use std::path::{Path, PathBuf};

use crate::error::SourceError;

/// How a path changed between two revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    /// Type change (e.g. file ↔ symlink); treated like a modification.
    TypeChanged,
}

impl ChangeKind {
    /// Whether a change of this kind leaves a script to deploy.
    pub fn is_deployable(self) -> bool {
        !matches!(self, ChangeKind::Deleted)
    }
}

/// One entry of a revision-to-revision diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub kind: ChangeKind,
    /// Repository-relative, `/`-separated.
    pub path: String,
}

/// Remote location to clone from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAuth {
    /// SSH URL plus the private key used for the transport.
    Ssh { url: String, key: PathBuf },
    Https { url: String },
}

impl RemoteAuth {
    pub fn url(&self) -> &str {
        match self {
            RemoteAuth::Ssh { url, .. } | RemoteAuth::Https { url } => url,
        }
    }
}

/// Clone / pull / diff / head over a local checkout.
pub trait SourceControl: Send + Sync {
    /// Clone `remote` at `branch` into `path`.
    fn ensure_cloned(&self, remote: &RemoteAuth, branch: &str, path: &Path)
        -> Result<(), SourceError>;

    /// Fast-forward the checkout at `path` to the remote tip of `branch`.
    fn pull(&self, path: &Path, branch: &str) -> Result<(), SourceError>;

    /// Paths changed between `from` and `to`.
    fn diff(&self, path: &Path, from: &str, to: &str) -> Result<Vec<DiffEntry>, SourceError>;

    /// Revision id of the checkout's `HEAD`.
    fn head_revision(&self, path: &Path) -> Result<String, SourceError>;
}
