pub mod backoff;
mod engine;
pub mod mirror;
pub mod paths;
pub mod reconcile;
mod state;
pub mod tracker;

use std::path::PathBuf;

use modforge_core::GithubError;
use thiserror::Error;

pub use engine::{SyncFailure, SyncOutcome, SyncReport, Workspace};
pub use paths::PathError;
pub use reconcile::{FileStatus, TreeNode, TreeView};
pub use state::DeleteJob;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("failed to load {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: GithubError,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote content changed since it was loaded: {0}")]
    Conflict(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("file is not open: {0}")]
    NotOpen(String),
    #[error("is a directory: {0}")]
    IsDirectory(String),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("failed to read {}: {source}", .path.display())]
    Import {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsynced changes exist, sync first")]
    UnsyncedChanges,
    #[error(transparent)]
    Api(#[from] GithubError),
}

impl WorkspaceError {
    /// Maps a remote failure on `path` onto the local taxonomy.
    pub fn from_remote(path: &str, err: GithubError) -> Self {
        if err.is_not_found() {
            WorkspaceError::NotFound(path.to_string())
        } else if err.is_conflict() {
            WorkspaceError::Conflict(path.to_string())
        } else {
            WorkspaceError::Api(err)
        }
    }
}
