//! Resumable phase execution
//!
//! Runs the ordered step list for a workflow's current phase. Every
//! completed step is persisted before the next one starts, so re-entry
//! after a crash or error skips finished work and resumes at the first
//! incomplete step. Steps are idempotent up to the side effect they record.

use super::engine::WorkflowEngine;
use super::phase::{plan_for, PhaseKind};
use crate::adapters::{
    AgentInvocation, AgentRunner, CancelToken, IssueBoard, WorkspaceManager,
};
use crate::config::{PollingSection, RoutingSettings};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::{Workflow, WorkflowStatus, WorkflowType};
use crate::polling::{PollRequest, SignalPoller, SignalType};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Agent driving phase work when the workflow context names none
const DEFAULT_PHASE_AGENT: &str = "pm";

const PHASE_AGENT_SYSTEM_PROMPT: &str = "You are the project-management agent for feature \
workflows. Execute the requested workflow end to end, consult expert agents where the \
instructions allow, and post a comment containing \u{2705} on the feature ticket when you \
are done.";

/// What one `execute` call did
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub phase: String,
    pub kind: PhaseKind,
    pub steps_run: Vec<String>,
    pub steps_skipped: Vec<String>,
    /// All steps of the phase are complete; the approval gate is next
    pub gate_reached: bool,
}

/// Executes phase steps against the external adapters
pub struct PhaseExecutor {
    engine: Arc<WorkflowEngine>,
    board: Arc<dyn IssueBoard>,
    workspace: Arc<dyn WorkspaceManager>,
    runner: Arc<dyn AgentRunner>,
    poller: SignalPoller,
    routing: Arc<RoutingSettings>,
    polling: PollingSection,
}

impl PhaseExecutor {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        board: Arc<dyn IssueBoard>,
        workspace: Arc<dyn WorkspaceManager>,
        runner: Arc<dyn AgentRunner>,
        routing: Arc<RoutingSettings>,
        polling: PollingSection,
    ) -> Self {
        Self {
            engine,
            poller: SignalPoller::new(board.clone()),
            board,
            workspace,
            runner,
            routing,
            polling,
        }
    }

    /// Run the remaining steps of the current phase.
    ///
    /// A step failure is recorded as an `error` history event and surfaced;
    /// the workflow stays `in_progress` and a later call resumes at the
    /// failed step.
    pub async fn execute(
        &self,
        workflow_id: &str,
        cancel: &CancelToken,
    ) -> OrchestratorResult<PhaseOutcome> {
        let mut workflow = self.engine.get(workflow_id).await?;

        if workflow.status != WorkflowStatus::InProgress {
            return Err(OrchestratorError::internal(format!(
                "workflow {workflow_id} is {} and cannot execute a phase",
                workflow.status
            )));
        }

        let plan = plan_for(workflow.workflow_type, workflow.phase_number()).ok_or_else(|| {
            OrchestratorError::internal(format!(
                "no phase plan for {} {}",
                workflow.workflow_type, workflow.current_phase
            ))
        })?;

        info!(
            workflow_id,
            phase = %workflow.current_phase,
            already_completed = workflow.phase_steps_completed.len(),
            "executing phase"
        );

        let mut steps_run = Vec::new();
        let mut steps_skipped = Vec::new();

        for &step in plan.steps {
            if workflow.step_completed(step) {
                debug!(workflow_id, step, "step already recorded, skipping");
                steps_skipped.push(step.to_string());
                continue;
            }

            match self.run_step(&workflow, step, cancel).await {
                Ok(artifacts) => {
                    workflow = self.engine.record_step(workflow_id, step, artifacts).await?;
                    steps_run.push(step.to_string());
                    info!(workflow_id, step, "step completed");
                }
                Err(e) => {
                    self.engine
                        .record_step_failure(workflow_id, step, &e.to_string())
                        .await?;
                    return Err(e);
                }
            }
        }

        Ok(PhaseOutcome {
            phase: workflow.current_phase.clone(),
            kind: plan.kind,
            steps_run,
            steps_skipped,
            gate_reached: true,
        })
    }

    async fn run_step(
        &self,
        workflow: &Workflow,
        step: &str,
        cancel: &CancelToken,
    ) -> OrchestratorResult<Map<String, Value>> {
        match step {
            "issue" => self.step_issue(workflow).await,
            "branch" => self.step_branch(workflow).await,
            "worktree" => self.step_worktree(workflow).await,
            "plans" => self.step_plans(workflow).await,
            "dispatch" => self.step_dispatch(workflow, cancel).await,
            "await_agent" => self.step_await(workflow, SignalType::AgentComplete, cancel).await,
            "await_approval" => {
                self.step_await(workflow, SignalType::HumanApproval, cancel).await
            }
            other => Err(OrchestratorError::internal(format!(
                "unknown phase step '{other}'"
            ))),
        }
    }

    async fn step_issue(&self, workflow: &Workflow) -> OrchestratorResult<Map<String, Value>> {
        let body = format!(
            "Feature `{}`\n\nWorkflow: {}\n\n{}",
            workflow.feature_id, workflow.workflow_type, workflow.feature_description
        );
        let issue = self
            .board
            .create_issue(
                &workflow.feature_description,
                &body,
                &["specflow".to_string()],
            )
            .await?;

        let mut artifacts = Map::new();
        artifacts.insert("issue_number".to_string(), json!(issue.number));
        Ok(artifacts)
    }

    async fn step_branch(&self, workflow: &Workflow) -> OrchestratorResult<Map<String, Value>> {
        let branch = self.workspace.create_branch(&workflow.feature_id).await?;
        let mut artifacts = Map::new();
        artifacts.insert("branch".to_string(), json!(branch.name));
        Ok(artifacts)
    }

    async fn step_worktree(&self, workflow: &Workflow) -> OrchestratorResult<Map<String, Value>> {
        let branch = workflow
            .context
            .get("branch")
            .and_then(|v| v.as_str())
            .unwrap_or(&workflow.feature_id)
            .to_string();
        let worktree = self.workspace.create_worktree(&branch).await?;

        let mut artifacts = Map::new();
        artifacts.insert(
            "worktree_path".to_string(),
            json!(worktree.path.display().to_string()),
        );
        Ok(artifacts)
    }

    async fn step_plans(&self, workflow: &Workflow) -> OrchestratorResult<Map<String, Value>> {
        let root = self
            .workspace
            .init_artifact_tree(&workflow.feature_id)
            .await?;
        let mut artifacts = Map::new();
        artifacts.insert("plans_dir".to_string(), json!(root.display().to_string()));
        Ok(artifacts)
    }

    async fn step_dispatch(
        &self,
        workflow: &Workflow,
        cancel: &CancelToken,
    ) -> OrchestratorResult<Map<String, Value>> {
        let agent_id = workflow
            .context
            .get("agent")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_PHASE_AGENT)
            .to_string();
        let model = self
            .routing
            .agents
            .get(&agent_id)
            .and_then(|agent| agent.model.clone())
            .unwrap_or_else(|| self.routing.model.clone());
        let timeout = self.routing.timeout_for_agent(&agent_id);

        let tools = workflow
            .context
            .get("tools")
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|t| t.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let invocation = AgentInvocation {
            agent_id: agent_id.clone(),
            system_prompt: PHASE_AGENT_SYSTEM_PROMPT.to_string(),
            user_prompt: phase_prompt(workflow),
            model,
            tools,
            timeout: Duration::from_secs(timeout),
        };
        self.runner.dispatch(invocation, cancel).await?;

        let mut artifacts = Map::new();
        artifacts.insert("agent_id".to_string(), json!(agent_id));
        artifacts.insert("dispatched".to_string(), json!(true));
        Ok(artifacts)
    }

    async fn step_await(
        &self,
        workflow: &Workflow,
        signal: SignalType,
        cancel: &CancelToken,
    ) -> OrchestratorResult<Map<String, Value>> {
        let ticket = workflow
            .context
            .get("issue_number")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                OrchestratorError::internal(
                    "issue_number missing from workflow context; cannot poll for signals",
                )
            })?;

        let request = PollRequest::new(ticket, signal)
            .with_timeout(Duration::from_secs(self.polling.timeout_seconds))
            .with_interval(Duration::from_secs(self.polling.interval_seconds))
            .raising_on_timeout();
        let result = self.poller.poll(&request, cancel).await?;

        if result.cancelled {
            return Err(OrchestratorError::internal(format!(
                "poll for {signal} cancelled before detection"
            )));
        }

        let mut artifacts = Map::new();
        match signal {
            SignalType::AgentComplete => {
                artifacts.insert("agent_complete_comment_id".to_string(), json!(result.comment_id));
                artifacts.insert(
                    "agent_complete_author".to_string(),
                    json!(result.comment_author),
                );
            }
            SignalType::HumanApproval => {
                artifacts.insert("approval_comment_id".to_string(), json!(result.comment_id));
                artifacts.insert("approval_author".to_string(), json!(result.comment_author));
            }
        }
        Ok(artifacts)
    }
}

/// The dispatch prompt for the workflow's current agent phase
fn phase_prompt(workflow: &Workflow) -> String {
    let worktree = workflow
        .context
        .get("worktree_path")
        .and_then(|v| v.as_str())
        .unwrap_or("the feature worktree");

    match workflow.workflow_type {
        WorkflowType::Specify => format!(
            "Execute the SPECIFY workflow for this feature:\n\n\
             ## Feature Description\n\n{}\n\n\
             ## Configuration\n\n- Feature ID: {}\n- Worktree: {}\n\n\
             Analyze the description, consult experts where needed, fill all mandatory \
             template sections, and write spec.md under the feature's specs/ directory.",
            workflow.feature_description, workflow.feature_id, worktree
        ),
        WorkflowType::Plan => format!(
            "Execute the PLAN workflow for feature {}:\n\n\
             Read the specification under specs/, resolve unknowns into research notes, \
             derive the data model and contracts, and write plan.md under plans/.\n\n\
             Worktree: {}",
            workflow.feature_id, worktree
        ),
        WorkflowType::Tasks => format!(
            "Execute the TASKS workflow for feature {}:\n\n\
             Read plan.md and the specification, then generate the ordered task list \
             (test tasks before implementation tasks) as tasks.md.",
            workflow.feature_id
        ),
        WorkflowType::Implement => format!(
            "Execute the IMPLEMENT workflow for feature {}:\n\n\
             Work through tasks.md in order inside {}, committing as tasks complete.",
            workflow.feature_id, worktree
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SystemClock;
    use crate::config::SpecflowConfig;
    use crate::testing::mocks::{InMemoryIssueBoard, MockAgentRunner, MockWorkspace};
    use crate::workflow::store::WorkflowStore;

    struct Fixture {
        engine: Arc<WorkflowEngine>,
        executor: PhaseExecutor,
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
            engine,
            executor,
            board,
            workspace,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_setup_phase_runs_all_four_steps() {
        let fixture = fixture();
        let workflow = fixture
            .engine
            .create("specify", "Add auth", None)
            .await
            .unwrap();

        let outcome = fixture
            .executor
            .execute(&workflow.id, &CancelToken::new())
            .await
            .unwrap();

        assert!(outcome.gate_reached);
        assert_eq!(outcome.kind, PhaseKind::Setup);
        assert_eq!(outcome.steps_run, vec!["issue", "branch", "worktree", "plans"]);

        let workflow = fixture.engine.get(&workflow.id).await.unwrap();
        assert_eq!(workflow.phase_steps_completed.len(), 4);
        assert!(workflow.context.get("issue_number").is_some());
        assert_eq!(workflow.context["branch"], workflow.feature_id.as_str());
        assert!(fixture.workspace.has_branch(&workflow.feature_id).await);
    }

    #[tokio::test]
    async fn test_resume_skips_completed_steps() {
        let fixture = fixture();
        let workflow = fixture
            .engine
            .create("specify", "Add auth", None)
            .await
            .unwrap();

        // First run completes everything
        fixture
            .executor
            .execute(&workflow.id, &CancelToken::new())
            .await
            .unwrap();
        // Second run must observe each side effect exactly once
        let outcome = fixture
            .executor
            .execute(&workflow.id, &CancelToken::new())
            .await
            .unwrap();

        assert!(outcome.steps_run.is_empty());
        assert_eq!(outcome.steps_skipped.len(), 4);
        assert_eq!(fixture.workspace.call_count("create_branch").await, 1);
        assert_eq!(fixture.workspace.call_count("create_worktree").await, 1);
    }

    #[tokio::test]
    async fn test_step_failure_persists_progress_and_surfaces() {
        let fixture = fixture();
        let workflow = fixture
            .engine
            .create("specify", "Add auth", None)
            .await
            .unwrap();

        // Pre-claim the branch so the branch step fails after issue succeeds
        fixture
            .workspace
            .create_branch("001-add-auth")
            .await
            .unwrap();

        let result = fixture
            .executor
            .execute(&workflow.id, &CancelToken::new())
            .await;
        assert!(result.is_err());

        let workflow = fixture.engine.get(&workflow.id).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::InProgress);
        assert_eq!(workflow.phase_steps_completed, vec!["issue"]);

        let history = fixture.engine.history(&workflow.id).await.unwrap();
        let failure = history.last().unwrap();
        assert_eq!(failure.metadata.as_ref().unwrap()["step"], "branch");
    }

    #[tokio::test]
    async fn test_agent_phase_polls_ticket_signals() {
        let fixture = fixture();
        let mut context = Map::new();
        let ticket = fixture.board.seed_issue("Add auth").await;
        context.insert("issue_number".to_string(), json!(ticket));
        fixture
            .board
            .seed_comment(ticket, "bot", "Spec drafted \u{2705}")
            .await;
        fixture
            .board
            .seed_comment(ticket, "reviewer", "approved, nice work")
            .await;

        let workflow = fixture
            .engine
            .create("tasks", "Generate tasks", Some(context))
            .await
            .unwrap();

        let outcome = fixture
            .executor
            .execute(&workflow.id, &CancelToken::new())
            .await
            .unwrap();

        assert!(outcome.gate_reached);
        assert_eq!(outcome.kind, PhaseKind::Agent);
        assert_eq!(outcome.steps_run, vec!["dispatch", "await_agent", "await_approval"]);

        let workflow = fixture.engine.get(&workflow.id).await.unwrap();
        assert_eq!(workflow.context["approval_author"], "reviewer");
    }

    #[tokio::test]
    async fn test_agent_phase_without_ticket_fails_cleanly() {
        let fixture = fixture();
        let workflow = fixture
            .engine
            .create("tasks", "Generate tasks", None)
            .await
            .unwrap();

        let result = fixture
            .executor
            .execute(&workflow.id, &CancelToken::new())
            .await;
        assert!(result.is_err());

        // dispatch succeeded and was recorded; only the await step failed
        let workflow = fixture.engine.get(&workflow.id).await.unwrap();
        assert_eq!(workflow.phase_steps_completed, vec!["dispatch"]);
    }
}
