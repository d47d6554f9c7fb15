//! Phase plans: the ordered step lists each workflow type runs
//!
//! `specify` and `plan` run a repository-setup phase before their agent
//! phase; `tasks` and `implement` go straight to the agent phase against an
//! already-prepared feature.

use crate::model::WorkflowType;

/// What a phase is made of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    /// Ticket, branch, worktree, artifact tree
    Setup,
    /// Agent dispatch plus the two signal waits
    Agent,
}

/// Step names of the setup phase, in execution order
pub const SETUP_STEPS: &[&str] = &["issue", "branch", "worktree", "plans"];
/// Step names of the agent phase, in execution order
pub const AGENT_STEPS: &[&str] = &["dispatch", "await_agent", "await_approval"];

/// The step list for one phase of one workflow type
#[derive(Debug, Clone, Copy)]
pub struct PhasePlan {
    pub phase: u32,
    pub kind: PhaseKind,
    pub steps: &'static [&'static str],
}

/// Plan for `phase_number` of a workflow type; `None` past the last phase
pub fn plan_for(workflow_type: WorkflowType, phase_number: u32) -> Option<PhasePlan> {
    match (workflow_type, phase_number) {
        (WorkflowType::Specify | WorkflowType::Plan, 1) => Some(PhasePlan {
            phase: 1,
            kind: PhaseKind::Setup,
            steps: SETUP_STEPS,
        }),
        (WorkflowType::Specify | WorkflowType::Plan, 2) => Some(PhasePlan {
            phase: 2,
            kind: PhaseKind::Agent,
            steps: AGENT_STEPS,
        }),
        (WorkflowType::Tasks | WorkflowType::Implement, 1) => Some(PhasePlan {
            phase: 1,
            kind: PhaseKind::Agent,
            steps: AGENT_STEPS,
        }),
        _ => None,
    }
}
