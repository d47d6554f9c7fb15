//! Local git implementation of the workspace capability
//!
//! Branches are cut off a configured base branch; worktrees land in sibling
//! directories named `<repo>-<branch>`; the per-feature artifact tree lives
//! under `.plans/<feature_id>/`.

use super::workspace::{BranchRef, WorkspaceError, WorkspaceManager, WorktreeRef};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Git-backed [`WorkspaceManager`] rooted at a repository checkout
pub struct GitWorkspace {
    repo_path: PathBuf,
    base_branch: String,
}

impl GitWorkspace {
    pub fn new(repo_path: impl Into<PathBuf>, base_branch: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            base_branch: base_branch.into(),
        }
    }

    async fn git(&self, cwd: &Path, args: &[&str]) -> Result<String, WorkspaceError> {
        debug!(?args, cwd = %cwd.display(), "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(WorkspaceError::Git {
                message: format!(
                    "git {} failed: {}",
                    args.first().copied().unwrap_or(""),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }

    async fn branch_exists(&self, name: &str) -> Result<bool, WorkspaceError> {
        let output = Command::new("git")
            .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{name}")])
            .current_dir(&self.repo_path)
            .output()
            .await?;
        Ok(output.status.success())
    }

    /// Sibling directory for a branch's worktree: `<repo>-<branch>`
    pub fn worktree_path(&self, branch: &str) -> PathBuf {
        let repo_name = self
            .repo_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "repo".to_string());
        let parent = self
            .repo_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        parent.join(format!("{repo_name}-{branch}"))
    }

    /// Root of the per-feature artifact tree inside the main checkout
    pub fn artifact_root(&self, feature_id: &str) -> PathBuf {
        self.repo_path.join(".plans").join(feature_id)
    }
}

#[async_trait]
impl WorkspaceManager for GitWorkspace {
    async fn create_branch(&self, name: &str) -> Result<BranchRef, WorkspaceError> {
        if self.branch_exists(name).await? {
            return Err(WorkspaceError::BranchExists {
                branch: name.to_string(),
            });
        }
        self.git(&self.repo_path, &["branch", name, &self.base_branch])
            .await?;
        info!(branch = name, base = %self.base_branch, "created branch");
        Ok(BranchRef {
            name: name.to_string(),
            created: true,
        })
    }

    async fn create_worktree(&self, branch: &str) -> Result<WorktreeRef, WorkspaceError> {
        let path = self.worktree_path(branch);
        if path.exists() {
            return Err(WorkspaceError::PathExists {
                path: path.display().to_string(),
            });
        }
        let path_arg = path.display().to_string();
        self.git(&self.repo_path, &["worktree", "add", &path_arg, branch])
            .await?;
        info!(branch, path = %path.display(), "created worktree");
        Ok(WorktreeRef {
            path,
            branch: branch.to_string(),
        })
    }

    async fn init_artifact_tree(&self, feature_id: &str) -> Result<PathBuf, WorkspaceError> {
        let root = self.artifact_root(feature_id);
        for subdir in ["specs", "plans", "reviews"] {
            std::fs::create_dir_all(root.join(subdir))?;
        }
        let meta_path = root.join("meta.json");
        if !meta_path.exists() {
            let meta = serde_json::json!({ "feature_id": feature_id });
            std::fs::write(&meta_path, serde_json::to_string_pretty(&meta).unwrap())?;
        }
        Ok(root)
    }

    async fn commit_and_push(&self, branch: &str, message: &str) -> Result<(), WorkspaceError> {
        let worktree = self.worktree_path(branch);
        let cwd = if worktree.exists() {
            worktree
        } else {
            self.repo_path.clone()
        };

        self.git(&cwd, &["add", "-A"]).await?;
        let status = self.git(&cwd, &["status", "--porcelain"]).await?;
        if status.is_empty() {
            debug!(branch, "nothing to commit");
        } else {
            self.git(&cwd, &["commit", "-m", message]).await?;
        }
        self.git(&cwd, &["push", "-u", "origin", branch]).await?;
        Ok(())
    }

    async fn remove_worktree(&self, branch: &str) -> Result<(), WorkspaceError> {
        let path = self.worktree_path(branch);
        if path.exists() {
            let path_arg = path.display().to_string();
            self.git(&self.repo_path, &["worktree", "remove", "--force", &path_arg])
                .await?;
        }
        if self.branch_exists(branch).await? {
            self.git(&self.repo_path, &["branch", "-D", branch]).await?;
        }
        Ok(())
    }
}
