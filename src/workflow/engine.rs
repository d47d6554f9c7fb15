//! Workflow state machine: the sole writer of workflow state and history
//!
//! The engine permits exactly the transition table below; everything else
//! fails with `INVALID_STATE_TRANSITION`. Every transition appends a history
//! row and is persisted before the call returns.
//!
//! ```text
//! pending          --start-->           in_progress
//! in_progress      --agent_complete-->  waiting_approval
//! in_progress      --error-->           failed
//! waiting_approval --human_approved-->  in_progress | completed (last phase)
//! waiting_approval --human_rejected-->  in_progress (rework)
//! waiting_approval --error-->           failed
//! ```

use super::store::{StoredWorkflow, WorkflowStore};
use crate::adapters::Clock;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::workflow::next_phase;
use crate::model::{Trigger, Workflow, WorkflowHistory, WorkflowStatus, WorkflowType};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Maximum slug length inside a feature id
const MAX_SLUG_LEN: usize = 30;

/// Owns workflow state, enforces the transition table, persists history
pub struct WorkflowEngine {
    store: Arc<WorkflowStore>,
    clock: Arc<dyn Clock>,
    /// Serializes feature-id allocation across concurrent creates
    create_lock: Mutex<()>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<WorkflowStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            create_lock: Mutex::new(()),
        }
    }

    /// Create a workflow: persist `pending`, immediately apply `start`, and
    /// land in `in_progress` at `phase_1`.
    pub async fn create(
        &self,
        workflow_type: &str,
        feature_description: &str,
        context: Option<Map<String, Value>>,
    ) -> OrchestratorResult<Workflow> {
        let workflow_type = parse_workflow_type(workflow_type)?;

        let _guard = self.create_lock.lock().await;
        let feature_id = self.generate_feature_id(feature_description).await?;
        let now = self.clock.now();

        let mut stored = StoredWorkflow {
            workflow: Workflow {
                id: Uuid::new_v4().to_string(),
                workflow_type,
                feature_id,
                feature_description: feature_description.to_string(),
                context: context.unwrap_or_default(),
                status: WorkflowStatus::Pending,
                current_phase: "phase_1".to_string(),
                phase_steps_completed: Vec::new(),
                result: None,
                error: None,
                created_at: now,
                updated_at: now,
                completed_at: None,
            },
            history: Vec::new(),
        };

        self.apply_transition(&mut stored, Trigger::Start, None)?;
        self.store.insert(stored.clone()).await?;

        info!(
            workflow_id = %stored.workflow.id,
            feature_id = %stored.workflow.feature_id,
            workflow_type = %stored.workflow.workflow_type,
            "workflow created"
        );
        Ok(stored.workflow)
    }

    pub async fn get(&self, workflow_id: &str) -> OrchestratorResult<Workflow> {
        Ok(self.store.get(workflow_id).await?.workflow)
    }

    /// Full transition history, oldest first
    pub async fn history(&self, workflow_id: &str) -> OrchestratorResult<Vec<WorkflowHistory>> {
        Ok(self.store.get(workflow_id).await?.history)
    }

    /// Advance the state machine. Per-workflow serialized; the new state is
    /// persisted with its history row before returning.
    pub async fn advance(
        &self,
        workflow_id: &str,
        trigger: Trigger,
        payload: Option<Value>,
    ) -> OrchestratorResult<Workflow> {
        let entry = self.store.entry(workflow_id).await?;
        let mut stored = entry.lock().await;

        self.apply_transition(&mut stored, trigger, payload)?;
        self.store.persist(&stored)?;

        info!(
            workflow_id,
            trigger = %trigger,
            status = %stored.workflow.status,
            phase = %stored.workflow.current_phase,
            "workflow advanced"
        );
        Ok(stored.workflow.clone())
    }

    /// Record a completed phase step and merge its artifacts into the
    /// workflow context. Appends the step name exactly once.
    pub async fn record_step(
        &self,
        workflow_id: &str,
        step: &str,
        artifacts: Map<String, Value>,
    ) -> OrchestratorResult<Workflow> {
        let entry = self.store.entry(workflow_id).await?;
        let mut stored = entry.lock().await;

        if !stored.workflow.step_completed(step) {
            stored.workflow.phase_steps_completed.push(step.to_string());
        }
        for (key, value) in artifacts {
            stored.workflow.context.insert(key, value);
        }
        stored.workflow.updated_at = self.clock.now();
        self.store.persist(&stored)?;
        Ok(stored.workflow.clone())
    }

    /// Record a step failure as a history event without changing status; the
    /// workflow stays `in_progress` so a retry resumes at the failed step.
    pub async fn record_step_failure(
        &self,
        workflow_id: &str,
        step: &str,
        error_message: &str,
    ) -> OrchestratorResult<()> {
        let entry = self.store.entry(workflow_id).await?;
        let mut stored = entry.lock().await;

        let status = stored.workflow.status;
        let row = WorkflowHistory {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            from_status: status,
            to_status: status,
            trigger: Trigger::Error,
            timestamp: self.clock.now(),
            metadata: Some(serde_json::json!({
                "step": step,
                "phase": stored.workflow.current_phase,
                "error": error_message,
            })),
        };
        stored.history.push(row);
        stored.workflow.updated_at = self.clock.now();
        self.store.persist(&stored)?;

        warn!(workflow_id, step, error = error_message, "phase step failed");
        Ok(())
    }

    /// Validate the `(status, trigger)` pair, mutate, and append history
    fn apply_transition(
        &self,
        stored: &mut StoredWorkflow,
        trigger: Trigger,
        payload: Option<Value>,
    ) -> OrchestratorResult<()> {
        let from = stored.workflow.status;
        let to = next_status(from, trigger, stored.workflow.is_last_phase()).ok_or(
            OrchestratorError::InvalidStateTransition { from, trigger },
        )?;

        let now = self.clock.now();
        stored.history.push(WorkflowHistory {
            id: Uuid::new_v4().to_string(),
            workflow_id: stored.workflow.id.clone(),
            from_status: from,
            to_status: to,
            trigger,
            timestamp: now,
            metadata: payload.clone(),
        });

        stored.workflow.status = to;
        stored.workflow.updated_at = now;

        match (from, trigger, to) {
            // Next phase: steps are per-phase, so the set resets
            (WorkflowStatus::WaitingApproval, Trigger::HumanApproved, WorkflowStatus::InProgress) => {
                stored.workflow.current_phase = next_phase(&stored.workflow.current_phase);
                stored.workflow.phase_steps_completed.clear();
            }
            // Rework: same phase, re-run from the top
            (WorkflowStatus::WaitingApproval, Trigger::HumanRejected, WorkflowStatus::InProgress) => {
                stored.workflow.phase_steps_completed.clear();
            }
            (_, Trigger::HumanApproved, WorkflowStatus::Completed) => {
                stored.workflow.completed_at = Some(now);
                stored.workflow.result = payload;
            }
            (_, Trigger::Error, WorkflowStatus::Failed) => {
                stored.workflow.error = payload
                    .as_ref()
                    .and_then(|p| p.get("error"))
                    .and_then(|e| e.as_str())
                    .map(String::from)
                    .or_else(|| payload.as_ref().and_then(|p| p.as_str().map(String::from)))
                    .or(Some("unknown error".to_string()));
            }
            _ => {}
        }

        Ok(())
    }

    /// Derive `NNN-slug`: next counter across all workflows plus the
    /// slugified description.
    async fn generate_feature_id(&self, description: &str) -> OrchestratorResult<String> {
        let next = self.store.max_feature_number().await? + 1;
        Ok(format!("{next:03}-{}", slugify(description)))
    }
}

/// Permitted transitions; `None` means `INVALID_STATE_TRANSITION`
fn next_status(from: WorkflowStatus, trigger: Trigger, last_phase: bool) -> Option<WorkflowStatus> {
    match (from, trigger) {
        (WorkflowStatus::Pending, Trigger::Start) => Some(WorkflowStatus::InProgress),
        (WorkflowStatus::InProgress, Trigger::AgentComplete) => {
            Some(WorkflowStatus::WaitingApproval)
        }
        (WorkflowStatus::InProgress, Trigger::Error) => Some(WorkflowStatus::Failed),
        (WorkflowStatus::WaitingApproval, Trigger::HumanApproved) => {
            if last_phase {
                Some(WorkflowStatus::Completed)
            } else {
                Some(WorkflowStatus::InProgress)
            }
        }
        (WorkflowStatus::WaitingApproval, Trigger::HumanRejected) => {
            Some(WorkflowStatus::InProgress)
        }
        (WorkflowStatus::WaitingApproval, Trigger::Error) => Some(WorkflowStatus::Failed),
        _ => None,
    }
}

fn parse_workflow_type(value: &str) -> OrchestratorResult<WorkflowType> {
    match value {
        "specify" => Ok(WorkflowType::Specify),
        "plan" => Ok(WorkflowType::Plan),
        "tasks" => Ok(WorkflowType::Tasks),
        "implement" => Ok(WorkflowType::Implement),
        other => Err(OrchestratorError::InvalidWorkflowType {
            value: other.to_string(),
        }),
    }
}

static NON_SLUG_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Lowercase, non-alphanumerics collapsed to `-`, ≤30 chars, no trailing `-`
pub fn slugify(description: &str) -> String {
    let lowered = description.to_lowercase();
    let slug = NON_SLUG_CHARS.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    let mut slug = slug.chars().take(MAX_SLUG_LEN).collect::<String>();
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "feature".to_string()
    } else {
        slug
    }
}
