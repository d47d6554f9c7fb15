//! Workflow engine, phase executor, and the orchestration facade
//!
//! [`WorkflowEngine`] owns state and history; [`PhaseExecutor`] runs phase
//! steps against the external adapters; [`Orchestrator`] wires them together
//! with label sync and drives the approval gates.

pub mod engine;
pub mod executor;
pub mod labels;
pub mod phase;
pub mod store;

pub use engine::{slugify, WorkflowEngine};
pub use executor::{PhaseExecutor, PhaseOutcome};
pub use labels::{status_label, LabelSync};
pub use phase::{plan_for, PhaseKind, PhasePlan, AGENT_STEPS, SETUP_STEPS};
pub use store::{StoredWorkflow, WorkflowStore};

use crate::adapters::{CancelToken, IssueBoard, WorkspaceManager};
use crate::error::OrchestratorResult;
use crate::model::{Trigger, Workflow, WorkflowHistory};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Facade over engine, executor, poller, and label sync
pub struct Orchestrator {
    engine: Arc<WorkflowEngine>,
    executor: PhaseExecutor,
    labels: LabelSync,
    workspace: Arc<dyn WorkspaceManager>,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        executor: PhaseExecutor,
        board: Arc<dyn IssueBoard>,
        workspace: Arc<dyn WorkspaceManager>,
    ) -> Self {
        Self {
            engine,
            executor,
            labels: LabelSync::new(board),
            workspace,
        }
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    pub async fn create_workflow(
        &self,
        workflow_type: &str,
        feature_description: &str,
        context: Option<serde_json::Map<String, Value>>,
    ) -> OrchestratorResult<Workflow> {
        self.engine
            .create(workflow_type, feature_description, context)
            .await
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> OrchestratorResult<Workflow> {
        self.engine.get(workflow_id).await
    }

    pub async fn workflow_history(
        &self,
        workflow_id: &str,
    ) -> OrchestratorResult<Vec<WorkflowHistory>> {
        self.engine.history(workflow_id).await
    }

    /// Advance the state machine, then mirror the new status onto the ticket
    pub async fn advance(
        &self,
        workflow_id: &str,
        trigger: Trigger,
        payload: Option<Value>,
    ) -> OrchestratorResult<Workflow> {
        let workflow = self.engine.advance(workflow_id, trigger, payload).await?;
        self.sync_labels(&workflow).await;
        Ok(workflow)
    }

    /// Execute the current phase's remaining steps and drive the gates.
    ///
    /// Setup phases stop at `waiting_approval` for an out-of-band approval.
    /// Agent phases already observed the approval signal in-phase, so the
    /// workflow advances through the gate to the next phase or completion.
    pub async fn run_current_phase(
        &self,
        workflow_id: &str,
        cancel: &CancelToken,
    ) -> OrchestratorResult<Workflow> {
        let outcome = self.executor.execute(workflow_id, cancel).await?;
        if !outcome.gate_reached {
            return self.engine.get(workflow_id).await;
        }

        let workflow = self
            .advance(
                workflow_id,
                Trigger::AgentComplete,
                Some(json!({
                    "phase": outcome.phase,
                    "steps_run": outcome.steps_run,
                })),
            )
            .await?;

        match outcome.kind {
            PhaseKind::Setup => Ok(workflow),
            PhaseKind::Agent => {
                let approved_by = workflow
                    .context
                    .get("approval_author")
                    .cloned()
                    .unwrap_or(Value::Null);
                self.advance(
                    workflow_id,
                    Trigger::HumanApproved,
                    Some(json!({
                        "phase": outcome.phase,
                        "approved_by": approved_by,
                    })),
                )
                .await
            }
        }
    }

    /// Apply a human approval at the current gate
    pub async fn approve(
        &self,
        workflow_id: &str,
        payload: Option<Value>,
    ) -> OrchestratorResult<Workflow> {
        self.advance(workflow_id, Trigger::HumanApproved, payload).await
    }

    /// Apply a human rejection; the current phase re-runs
    pub async fn reject(
        &self,
        workflow_id: &str,
        payload: Option<Value>,
    ) -> OrchestratorResult<Workflow> {
        self.advance(workflow_id, Trigger::HumanRejected, payload).await
    }

    /// Stage, commit, and push the feature branch's artifacts
    pub async fn push_artifacts(
        &self,
        workflow_id: &str,
        message: &str,
    ) -> OrchestratorResult<()> {
        let workflow = self.engine.get(workflow_id).await?;
        let branch = feature_branch(&workflow);
        self.workspace.commit_and_push(&branch, message).await?;
        info!(workflow_id, branch = %branch, "artifacts pushed");
        Ok(())
    }

    /// Remove the feature worktree and branch once a workflow is terminal
    pub async fn cleanup_workspace(&self, workflow_id: &str) -> OrchestratorResult<()> {
        let workflow = self.engine.get(workflow_id).await?;
        if !workflow.status.is_terminal() {
            return Err(crate::error::OrchestratorError::internal(format!(
                "workflow {workflow_id} is {}; cleanup only applies to terminal workflows",
                workflow.status
            )));
        }
        let branch = feature_branch(&workflow);
        self.workspace.remove_worktree(&branch).await?;
        info!(workflow_id, branch = %branch, "workspace cleaned up");
        Ok(())
    }

    async fn sync_labels(&self, workflow: &Workflow) {
        let Some(ticket) = workflow.context.get("issue_number").and_then(|v| v.as_u64()) else {
            return;
        };
        if let Err(e) = self.labels.sync(ticket, workflow.status).await {
            warn!(
                workflow_id = %workflow.id,
                ticket,
                error = %e,
                "label sync failed after transition"
            );
        }
    }
}

/// The branch a workflow's artifacts live on: the recorded `branch` context
/// entry, or the feature id before the branch step has run
fn feature_branch(workflow: &Workflow) -> String {
    workflow
        .context
        .get("branch")
        .and_then(|v| v.as_str())
        .unwrap_or(&workflow.feature_id)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SystemClock;
    use crate::config::{PollingSection, SpecflowConfig};
    use crate::model::WorkflowStatus;
    use crate::testing::mocks::{InMemoryIssueBoard, MockAgentRunner, MockWorkspace};

    struct Fixture {
        orchestrator: Orchestrator,
        board: Arc<InMemoryIssueBoard>,
        workspace: Arc<MockWorkspace>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(WorkflowStore::open(dir.path()).unwrap());
        let engine = Arc::new(WorkflowEngine::new(store, Arc::new(SystemClock)));
        let board = Arc::new(InMemoryIssueBoard::new());
        let workspace = Arc::new(MockWorkspace::new());
        let runner = Arc::new(MockAgentRunner::answering("done", 95));
        let config = SpecflowConfig::test_config();

        let executor = PhaseExecutor::new(
            engine.clone(),
            board.clone(),
            workspace.clone(),
            runner,
            Arc::new(config.routing),
            PollingSection {
                timeout_seconds: 5,
                interval_seconds: 1,
            },
        );
        Fixture {
            orchestrator: Orchestrator::new(engine, executor, board.clone(), workspace.clone()),
            board,
            workspace,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_specify_flow_through_both_gates() {
        let fixture = fixture();

        let workflow = fixture
            .orchestrator
            .create_workflow("specify", "Add auth", None)
            .await
            .unwrap();
        assert_eq!(workflow.status, WorkflowStatus::InProgress);

        // Phase 1 (setup) runs to its gate
        let workflow = fixture
            .orchestrator
            .run_current_phase(&workflow.id, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(workflow.status, WorkflowStatus::WaitingApproval);
        assert_eq!(workflow.current_phase, "phase_1");

        // Status label mirrored on the ticket created by the issue step
        let ticket = workflow.context["issue_number"].as_u64().unwrap();
        assert_eq!(
            fixture.board.issue_labels(ticket).await,
            vec!["status:waiting-approval"]
        );

        // Human approves phase 1 → phase 2, steps reset
        let workflow = fixture
            .orchestrator
            .approve(&workflow.id, None)
            .await
            .unwrap();
        assert_eq!(workflow.status, WorkflowStatus::InProgress);
        assert_eq!(workflow.current_phase, "phase_2");
        assert!(workflow.phase_steps_completed.is_empty());

        // Seed the agent-complete and approval signals, then run phase 2
        fixture.board.seed_comment(ticket, "bot", "Spec ready \u{2705}").await;
        fixture
            .board
            .seed_comment(ticket, "reviewer", "Approved, ship it")
            .await;

        let workflow = fixture
            .orchestrator
            .run_current_phase(&workflow.id, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Completed);
        assert!(workflow.completed_at.is_some());
        assert_eq!(
            fixture.board.issue_labels(ticket).await,
            vec!["status:completed"]
        );

        // Artifacts can be pushed and the workspace reclaimed
        fixture
            .orchestrator
            .push_artifacts(&workflow.id, "Add feature artifacts")
            .await
            .unwrap();
        assert_eq!(fixture.workspace.commits().await.len(), 1);

        fixture
            .orchestrator
            .cleanup_workspace(&workflow.id)
            .await
            .unwrap();
        assert!(!fixture.workspace.has_branch(&workflow.feature_id).await);
    }

    #[tokio::test]
    async fn test_cleanup_refuses_live_workflow() {
        let fixture = fixture();
        let workflow = fixture
            .orchestrator
            .create_workflow("specify", "Add auth", None)
            .await
            .unwrap();

        let result = fixture.orchestrator.cleanup_workspace(&workflow.id).await;
        assert!(result.is_err());
    }
}
