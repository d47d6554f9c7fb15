//! Signal poller scenarios against the in-memory board: detection, timeout
//! budget, and late-arriving signals.

use specflow::adapters::CancelToken;
use specflow::polling::{PollRequest, SignalPoller, SignalType};
use specflow::testing::mocks::InMemoryIssueBoard;
use specflow::OrchestratorError;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_seeded_checkmark_detected_with_id_and_author() {
    let board = Arc::new(InMemoryIssueBoard::new());
    let ticket = board.seed_issue("Add auth").await;
    let comment_id = board.seed_comment(ticket, "github-actions[bot]", "Done ✅").await;
    let poller = SignalPoller::new(board);

    let request = PollRequest::new(ticket, SignalType::AgentComplete)
        .with_timeout(Duration::from_secs(5))
        .with_interval(Duration::from_secs(1));
    let result = poller.poll(&request, &CancelToken::new()).await.unwrap();

    assert!(result.detected);
    assert_eq!(result.comment_id, Some(comment_id));
    assert_eq!(result.comment_author.as_deref(), Some("github-actions[bot]"));
    assert!(result.poll_count >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_raises_within_budget() {
    let board = Arc::new(InMemoryIssueBoard::new());
    let ticket = board.seed_issue("Add auth").await;
    let poller = SignalPoller::new(board);

    let started = tokio::time::Instant::now();
    let request = PollRequest::new(ticket, SignalType::AgentComplete)
        .with_timeout(Duration::from_secs(5))
        .with_interval(Duration::from_secs(1))
        .raising_on_timeout();
    let result = poller.poll(&request, &CancelToken::new()).await;

    assert!(matches!(result, Err(OrchestratorError::PollTimeout { .. })));
    // Bounded by timeout + one interval
    assert!(started.elapsed() <= Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_first_matching_comment_wins() {
    let board = Arc::new(InMemoryIssueBoard::new());
    let ticket = board.seed_issue("Add auth").await;
    board.seed_comment(ticket, "user", "working on it").await;
    let first_match = board.seed_comment(ticket, "bot-a", "phase one ✅").await;
    board.seed_comment(ticket, "bot-b", "also done ✅").await;
    let poller = SignalPoller::new(board);

    let request = PollRequest::new(ticket, SignalType::AgentComplete)
        .with_timeout(Duration::from_secs(5))
        .with_interval(Duration::from_secs(1));
    let result = poller.poll(&request, &CancelToken::new()).await.unwrap();

    assert_eq!(result.comment_id, Some(first_match));
    assert_eq!(result.comment_author.as_deref(), Some("bot-a"));
}

#[tokio::test(start_paused = true)]
async fn test_approval_ignores_agent_signal_and_vice_versa() {
    let board = Arc::new(InMemoryIssueBoard::new());
    let ticket = board.seed_issue("Add auth").await;
    board.seed_comment(ticket, "bot", "all finished ✅").await;
    let poller = SignalPoller::new(board.clone());

    let request = PollRequest::new(ticket, SignalType::HumanApproval)
        .with_timeout(Duration::from_secs(2))
        .with_interval(Duration::from_secs(1));
    let result = poller.poll(&request, &CancelToken::new()).await.unwrap();
    assert!(!result.detected, "checkmark must not satisfy approval");
}

#[tokio::test(start_paused = true)]
async fn test_signal_arriving_mid_poll_is_caught() {
    let board = Arc::new(InMemoryIssueBoard::new());
    let ticket = board.seed_issue("Add auth").await;
    board.seed_comment(ticket, "user", "looking...").await;
    let poller = SignalPoller::new(board.clone());

    let board_for_reviewer = board.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        board_for_reviewer
            .seed_comment(ticket, "reviewer", "Approved after review")
            .await;
    });

    let request = PollRequest::new(ticket, SignalType::HumanApproval)
        .with_timeout(Duration::from_secs(60))
        .with_interval(Duration::from_secs(2));
    let result = poller.poll(&request, &CancelToken::new()).await.unwrap();

    assert!(result.detected);
    assert_eq!(result.comment_author.as_deref(), Some("reviewer"));
    assert!(result.poll_count >= 3);
}
