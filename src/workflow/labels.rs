//! Status-label mirroring on the feature ticket
//!
//! Keeps exactly one `status:*` label on the ticket, matching the workflow's
//! current status. Label sync is best effort; callers log failures and never
//! fail a transition over them.

use crate::adapters::IssueBoard;
use crate::error::OrchestratorResult;
use crate::model::WorkflowStatus;
use std::sync::Arc;
use tracing::debug;

/// Every status label the sync manages
pub const ALL_STATUS_LABELS: &[&str] = &[
    "status:pending",
    "status:in-progress",
    "status:waiting-approval",
    "status:completed",
    "status:failed",
];

/// Ticket label for a workflow status
pub fn status_label(status: WorkflowStatus) -> &'static str {
    match status {
        WorkflowStatus::Pending => "status:pending",
        WorkflowStatus::InProgress => "status:in-progress",
        WorkflowStatus::WaitingApproval => "status:waiting-approval",
        WorkflowStatus::Completed => "status:completed",
        WorkflowStatus::Failed => "status:failed",
    }
}

/// Mirrors workflow status onto ticket labels
pub struct LabelSync {
    board: Arc<dyn IssueBoard>,
}

impl LabelSync {
    pub fn new(board: Arc<dyn IssueBoard>) -> Self {
        Self { board }
    }

    /// Remove stale status labels and apply the current one
    pub async fn sync(&self, ticket: u64, status: WorkflowStatus) -> OrchestratorResult<()> {
        let current = status_label(status);
        let stale: Vec<String> = ALL_STATUS_LABELS
            .iter()
            .filter(|l| **l != current)
            .map(|l| l.to_string())
            .collect();

        self.board.remove_labels(ticket, &stale).await?;
        self.board.add_labels(ticket, &[current.to_string()]).await?;
        debug!(ticket, label = current, "status label synced");
        Ok(())
    }
}
