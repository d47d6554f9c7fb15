//! Workflow aggregate and its append-only transition history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The four workflow pipelines a client can start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowType {
    Specify,
    Plan,
    Tasks,
    Implement,
}

impl WorkflowType {
    /// Number of phases this workflow type runs before completion
    pub fn phase_count(&self) -> u32 {
        match self {
            WorkflowType::Specify | WorkflowType::Plan => 2,
            WorkflowType::Tasks | WorkflowType::Implement => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::Specify => "specify",
            WorkflowType::Plan => "plan",
            WorkflowType::Tasks => "tasks",
            WorkflowType::Implement => "implement",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    InProgress,
    WaitingApproval,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::WaitingApproval => "waiting_approval",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }

    /// Terminal states accept no further triggers
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive the workflow state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Start,
    AgentComplete,
    HumanApproved,
    HumanRejected,
    Error,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Start => "start",
            Trigger::AgentComplete => "agent_complete",
            Trigger::HumanApproved => "human_approved",
            Trigger::HumanRejected => "human_rejected",
            Trigger::Error => "error",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One multi-phase pipeline instance for a single feature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub workflow_type: WorkflowType,
    /// Human-legible partition key, `NNN-kebab-slug`
    pub feature_id: String,
    pub feature_description: String,
    /// Free-form attribute bag; step results land here under reserved keys
    /// such as `issue_number`, `branch`, `worktree_path`
    #[serde(default)]
    pub context: Map<String, Value>,
    pub status: WorkflowStatus,
    /// `phase_1`, `phase_2`, ... — advances monotonically
    pub current_phase: String,
    /// Step names completed within the current phase, in execution order
    #[serde(default)]
    pub phase_steps_completed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    /// Parse the numeric index out of `phase_N`
    pub fn phase_number(&self) -> u32 {
        phase_number(&self.current_phase)
    }

    /// Whether the current phase is the last one for this workflow type
    pub fn is_last_phase(&self) -> bool {
        self.phase_number() >= self.workflow_type.phase_count()
    }

    /// True once the named step has been recorded for the current phase
    pub fn step_completed(&self, step: &str) -> bool {
        self.phase_steps_completed.iter().any(|s| s == step)
    }
}

/// Maximum feature id length: 3-digit counter, hyphen, 30-char slug
pub const MAX_FEATURE_ID_LEN: usize = 34;

static FEATURE_ID_PATTERN: once_cell::sync::Lazy<regex::Regex> =
    once_cell::sync::Lazy::new(|| regex::Regex::new(r"^\d{3}-[a-z0-9-]+$").unwrap());

/// Validate the `NNN-kebab-slug` feature id shape
pub fn is_valid_feature_id(id: &str) -> bool {
    id.len() <= MAX_FEATURE_ID_LEN && FEATURE_ID_PATTERN.is_match(id)
}

/// Parse `phase_N` into `N`; unrecognized labels count as phase 1
pub fn phase_number(phase: &str) -> u32 {
    phase
        .strip_prefix("phase_")
        .and_then(|n| n.parse().ok())
        .unwrap_or(1)
}

/// Label of the phase after `phase_N`
pub fn next_phase(phase: &str) -> String {
    format!("phase_{}", phase_number(phase) + 1)
}

/// Append-only record of a single state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowHistory {
    pub id: String,
    pub workflow_id: String,
    pub from_status: WorkflowStatus,
    pub to_status: WorkflowStatus,
    pub trigger: Trigger,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_counts_per_type() {
        assert_eq!(WorkflowType::Specify.phase_count(), 2);
        assert_eq!(WorkflowType::Plan.phase_count(), 2);
        assert_eq!(WorkflowType::Tasks.phase_count(), 1);
        assert_eq!(WorkflowType::Implement.phase_count(), 1);
    }

    #[test]
    fn test_status_serialization_matches_wire_names() {
        let json = serde_json::to_string(&WorkflowStatus::WaitingApproval).unwrap();
        assert_eq!(json, "\"waiting_approval\"");
        let json = serde_json::to_string(&WorkflowStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_trigger_serialization() {
        let json = serde_json::to_string(&Trigger::AgentComplete).unwrap();
        assert_eq!(json, "\"agent_complete\"");
        let back: Trigger = serde_json::from_str("\"human_approved\"").unwrap();
        assert_eq!(back, Trigger::HumanApproved);
    }

    #[test]
    fn test_phase_number_parsing() {
        assert_eq!(phase_number("phase_1"), 1);
        assert_eq!(phase_number("phase_12"), 12);
        assert_eq!(phase_number("bogus"), 1);
        assert_eq!(next_phase("phase_1"), "phase_2");
    }

    #[test]
    fn test_feature_id_validation() {
        assert!(is_valid_feature_id("001-add-auth"));
        assert!(is_valid_feature_id("042-rate-limiter-v2"));
        assert!(!is_valid_feature_id("1-add-auth"));
        assert!(!is_valid_feature_id("001-Add-Auth"));
        assert!(!is_valid_feature_id("001_add_auth"));
        assert!(!is_valid_feature_id(&format!("001-{}", "a".repeat(40))));
    }

    #[test]
    fn test_terminal_states() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(!WorkflowStatus::WaitingApproval.is_terminal());
    }
}
