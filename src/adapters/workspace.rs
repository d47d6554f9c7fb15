//! Workspace capability: branches, worktrees, and the per-feature artifact tree
//!
//! All operations are idempotent with respect to their observable result so
//! phase steps can safely re-run after a crash.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// A branch created off the main line
#[derive(Debug, Clone)]
pub struct BranchRef {
    pub name: String,
    /// False when the branch already existed and creation was a no-op probe
    pub created: bool,
}

/// A working directory bound to a branch
#[derive(Debug, Clone)]
pub struct WorktreeRef {
    pub path: PathBuf,
    pub branch: String,
}

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Branch '{branch}' already exists")]
    BranchExists { branch: String },

    #[error("Worktree path '{path}' already exists")]
    PathExists { path: String },

    #[error("git failed: {message}")]
    Git { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait WorkspaceManager: Send + Sync {
    /// Create `name` off the main line; error if it already exists
    async fn create_branch(&self, name: &str) -> Result<BranchRef, WorkspaceError>;

    /// Materialize a sibling working directory bound to `branch`; error if
    /// the target path already exists
    async fn create_worktree(&self, branch: &str) -> Result<WorktreeRef, WorkspaceError>;

    /// Initialize `specs/`, `plans/`, `reviews/` and the metadata document
    /// for a feature; no-op when already present. Returns the tree root.
    async fn init_artifact_tree(&self, feature_id: &str) -> Result<PathBuf, WorkspaceError>;

    /// Stage everything, commit (no-op on a clean tree), push with upstream
    async fn commit_and_push(&self, branch: &str, message: &str) -> Result<(), WorkspaceError>;

    /// Remove the worktree and its branch; no-op when absent
    async fn remove_worktree(&self, branch: &str) -> Result<(), WorkspaceError>;
}
