//! External capability contracts consumed by the core
//!
//! The engine, hub, and poller never talk to the outside world directly; they
//! go through the four capability traits defined here. Each trait is a tight
//! method set implemented by a production adapter and by an in-memory mock
//! (see `crate::testing::mocks`).

pub mod agent_runner;
pub mod cli_runner;
pub mod clock;
pub mod git_workspace;
pub mod github;
pub mod issue_board;
pub mod workspace;

pub use agent_runner::{AgentInvocation, AgentRunOutput, AgentRunner, AgentRunnerError};
pub use cli_runner::CliAgentRunner;
pub use clock::{Clock, SystemClock};
pub use git_workspace::GitWorkspace;
pub use github::{GithubBoard, GithubConfig};
pub use issue_board::{Issue, IssueBoard, IssueBoardError, IssueComment};
pub use workspace::{BranchRef, WorkspaceError, WorkspaceManager, WorktreeRef};

use tokio::sync::watch;

/// Cooperative cancellation signal handed to every blocking operation.
///
/// Clones observe the same signal. A default token is never cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Signal cancellation to every clone of this token
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is signalled; never resolves otherwise
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        // The sender lives inside this token, so changed() cannot error out
        // while any clone exists.
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
