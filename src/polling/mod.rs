//! Long-polling watcher for completion and approval signals
//!
//! Watches a ticket's comment feed for a named textual signal. Each tick
//! fetches comments since the last-seen marker, checks them oldest-first,
//! and either returns the first match or sleeps the interval. Cancellation is
//! observed within one tick; rate limits pause at least the hinted wait.

use crate::adapters::{CancelToken, IssueBoard, IssueBoardError};
use crate::error::{OrchestratorError, OrchestratorResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The textual signals the poller recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    AgentComplete,
    HumanApproval,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::AgentComplete => "AGENT_COMPLETE",
            SignalType::HumanApproval => "HUMAN_APPROVAL",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a comment body carries the given signal
pub fn detect_signal(signal: SignalType, body: &str) -> bool {
    match signal {
        SignalType::AgentComplete => body.contains('✅'),
        SignalType::HumanApproval => body.to_lowercase().contains("approved"),
    }
}

/// One poll request against a ticket's comment feed
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub ticket: u64,
    pub signal: SignalType,
    pub timeout: Duration,
    pub interval: Duration,
    pub raise_on_timeout: bool,
}

impl PollRequest {
    pub fn new(ticket: u64, signal: SignalType) -> Self {
        Self {
            ticket,
            signal,
            timeout: Duration::from_secs(3600),
            interval: Duration::from_secs(30),
            raise_on_timeout: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn raising_on_timeout(mut self) -> Self {
        self.raise_on_timeout = true;
        self
    }
}

/// Outcome of a poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResult {
    pub detected: bool,
    pub signal: SignalType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_author: Option<String>,
    pub poll_count: u32,
    pub cancelled: bool,
}

impl PollResult {
    fn not_detected(signal: SignalType, poll_count: u32, cancelled: bool) -> Self {
        Self {
            detected: false,
            signal,
            comment_id: None,
            comment_author: None,
            poll_count,
            cancelled,
        }
    }
}

/// Polls an issue board for signal comments
pub struct SignalPoller {
    board: Arc<dyn IssueBoard>,
}

impl SignalPoller {
    pub fn new(board: Arc<dyn IssueBoard>) -> Self {
        Self { board }
    }

    /// Poll until the signal appears, the timeout elapses, or `cancel` fires.
    ///
    /// The poll count increments once per tick regardless of outcome. On
    /// timeout the result is either a `POLL_TIMEOUT` error or a non-detected
    /// result, per `raise_on_timeout`.
    pub async fn poll(
        &self,
        request: &PollRequest,
        cancel: &CancelToken,
    ) -> OrchestratorResult<PollResult> {
        let started = tokio::time::Instant::now();
        let mut poll_count: u32 = 0;
        let mut since: Option<DateTime<Utc>> = None;

        debug!(
            ticket = request.ticket,
            signal = %request.signal,
            timeout_secs = request.timeout.as_secs(),
            interval_secs = request.interval.as_secs(),
            "starting signal poll"
        );

        loop {
            if cancel.is_cancelled() {
                info!(ticket = request.ticket, signal = %request.signal, "poll cancelled");
                return Ok(PollResult::not_detected(request.signal, poll_count, true));
            }

            // One tick: fetch and scan. Rate-limited ticks still count.
            let mut pause = request.interval;
            match self.board.list_comments_since(request.ticket, since).await {
                Ok(mut comments) => {
                    poll_count += 1;
                    comments.sort_by_key(|c| (c.created_at, c.id));
                    for comment in &comments {
                        if detect_signal(request.signal, &comment.body) {
                            info!(
                                ticket = request.ticket,
                                signal = %request.signal,
                                comment_id = comment.id,
                                author = %comment.author,
                                poll_count,
                                "signal detected"
                            );
                            return Ok(PollResult {
                                detected: true,
                                signal: request.signal,
                                comment_id: Some(comment.id),
                                comment_author: Some(comment.author.clone()),
                                poll_count,
                                cancelled: false,
                            });
                        }
                    }
                    if let Some(last) = comments.last() {
                        since = Some(last.created_at);
                    }
                }
                Err(IssueBoardError::RateLimited { wait_seconds }) => {
                    poll_count += 1;
                    warn!(
                        ticket = request.ticket,
                        wait_seconds, "board rate limited; backing off"
                    );
                    pause = pause.max(Duration::from_secs(wait_seconds));
                }
                Err(e) => return Err(e.into()),
            }

            if started.elapsed() >= request.timeout {
                if request.raise_on_timeout {
                    return Err(OrchestratorError::PollTimeout {
                        signal: request.signal.to_string(),
                        ticket: request.ticket,
                        timeout_secs: request.timeout.as_secs(),
                    });
                }
                return Ok(PollResult::not_detected(request.signal, poll_count, false));
            }

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = cancel.cancelled() => {
                    info!(ticket = request.ticket, signal = %request.signal, "poll cancelled");
                    return Ok(PollResult::not_detected(request.signal, poll_count, true));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::InMemoryIssueBoard;

    fn poller_with_board() -> (SignalPoller, Arc<InMemoryIssueBoard>) {
        let board = Arc::new(InMemoryIssueBoard::new());
        (SignalPoller::new(board.clone()), board)
    }

    #[test]
    fn test_detect_agent_complete_checkmark() {
        for body in ["Done ✅", "✅ Complete", "Task ✅ finished"] {
            assert!(detect_signal(SignalType::AgentComplete, body), "{body}");
        }
        assert!(!detect_signal(SignalType::AgentComplete, "Done"));
    }

    #[test]
    fn test_detect_approved_case_insensitive() {
        for body in ["Approved", "APPROVED", "approved", "I have approved this"] {
            assert!(detect_signal(SignalType::HumanApproval, body), "{body}");
        }
        assert!(!detect_signal(SignalType::HumanApproval, "Looks good"));
    }

    #[test]
    fn test_signals_do_not_cross_detect() {
        assert!(!detect_signal(SignalType::AgentComplete, "approved"));
        assert!(!detect_signal(SignalType::HumanApproval, "Done ✅"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_detects_seeded_comment() {
        let (poller, board) = poller_with_board();
        let ticket = board.seed_issue("Add auth").await;
        board.seed_comment(ticket, "github-actions[bot]", "Done ✅").await;

        let request = PollRequest::new(ticket, SignalType::AgentComplete)
            .with_timeout(Duration::from_secs(5))
            .with_interval(Duration::from_secs(1));
        let result = poller.poll(&request, &CancelToken::new()).await.unwrap();

        assert!(result.detected);
        assert!(result.poll_count >= 1);
        assert_eq!(result.comment_author.as_deref(), Some("github-actions[bot]"));
        assert!(result.comment_id.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_without_raise() {
        let (poller, board) = poller_with_board();
        let ticket = board.seed_issue("Add auth").await;
        board.seed_comment(ticket, "user", "just chatter").await;

        let request = PollRequest::new(ticket, SignalType::AgentComplete)
            .with_timeout(Duration::from_secs(2))
            .with_interval(Duration::from_secs(1));
        let result = poller.poll(&request, &CancelToken::new()).await.unwrap();

        assert!(!result.detected);
        assert!(!result.cancelled);
        assert!(result.poll_count >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timeout_raises_when_asked() {
        let (poller, board) = poller_with_board();
        let ticket = board.seed_issue("Add auth").await;

        let request = PollRequest::new(ticket, SignalType::HumanApproval)
            .with_timeout(Duration::from_secs(2))
            .with_interval(Duration::from_secs(1))
            .raising_on_timeout();
        let result = poller.poll(&request, &CancelToken::new()).await;

        assert!(matches!(
            result,
            Err(OrchestratorError::PollTimeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_sees_comment_added_after_start() {
        let (poller, board) = poller_with_board();
        let ticket = board.seed_issue("Add auth").await;

        let board_clone = board.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            board_clone.seed_comment(ticket, "reviewer", "approved!").await;
        });

        let request = PollRequest::new(ticket, SignalType::HumanApproval)
            .with_timeout(Duration::from_secs(30))
            .with_interval(Duration::from_secs(1));
        let result = poller.poll(&request, &CancelToken::new()).await.unwrap();

        assert!(result.detected);
        assert_eq!(result.comment_author.as_deref(), Some("reviewer"));
        assert!(result.poll_count >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_returns_within_one_tick() {
        let (poller, board) = poller_with_board();
        let ticket = board.seed_issue("Add auth").await;

        let cancel = CancelToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            cancel_clone.cancel();
        });

        let request = PollRequest::new(ticket, SignalType::AgentComplete)
            .with_timeout(Duration::from_secs(600))
            .with_interval(Duration::from_secs(5));
        let result = poller.poll(&request, &cancel).await.unwrap();

        assert!(result.cancelled);
        assert!(!result.detected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_backs_off_at_least_hint() {
        let (poller, board) = poller_with_board();
        let ticket = board.seed_issue("Add auth").await;
        board.rate_limit_next(40).await;

        // Seed the signal; it is only visible after the rate-limited tick
        board.seed_comment(ticket, "bot", "Done ✅").await;

        let started = tokio::time::Instant::now();
        let request = PollRequest::new(ticket, SignalType::AgentComplete)
            .with_timeout(Duration::from_secs(600))
            .with_interval(Duration::from_secs(1));
        let result = poller.poll(&request, &CancelToken::new()).await.unwrap();

        assert!(result.detected);
        // First tick hit the limit, so at least the 40s hint elapsed
        assert!(started.elapsed() >= Duration::from_secs(40));
        assert!(result.poll_count >= 2);
    }

    #[test]
    fn test_signal_type_serialization() {
        assert_eq!(
            serde_json::to_string(&SignalType::AgentComplete).unwrap(),
            "\"AGENT_COMPLETE\""
        );
    }
}
