//! Mock implementations of the external capability traits

use crate::adapters::{
    AgentInvocation, AgentRunOutput, AgentRunner, AgentRunnerError, BranchRef, CancelToken, Clock,
    Issue, IssueBoard, IssueBoardError, IssueComment, WorkspaceError, WorkspaceManager,
    WorktreeRef,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

// ========== Agent runner ==========

#[derive(Debug, Clone)]
enum Scripted {
    Output(String),
    Unavailable(String),
    Timeout,
}

/// Scripted agent runner: queued responses first, then the fallback
#[derive(Clone, Default)]
pub struct MockAgentRunner {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    fallback: Arc<Mutex<Option<Scripted>>>,
    invocations: Arc<Mutex<Vec<AgentInvocation>>>,
}

impl MockAgentRunner {
    /// Always answer with a structured JSON body at the given confidence
    pub fn answering(text: &str, confidence: u8) -> Self {
        let runner = Self::default();
        let body = answer_json(text, confidence);
        *runner.fallback.try_lock().unwrap() = Some(Scripted::Output(body));
        runner
    }

    /// Always return this raw output verbatim
    pub fn single_response(raw: &str) -> Self {
        let runner = Self::default();
        *runner.fallback.try_lock().unwrap() = Some(Scripted::Output(raw.to_string()));
        runner
    }

    /// Always fail dispatch as unavailable
    pub fn with_failure(message: &str) -> Self {
        let runner = Self::default();
        *runner.fallback.try_lock().unwrap() = Some(Scripted::Unavailable(message.to_string()));
        runner
    }

    /// Always time out
    pub fn with_timeout() -> Self {
        let runner = Self::default();
        *runner.fallback.try_lock().unwrap() = Some(Scripted::Timeout);
        runner
    }

    /// Queue one structured answer ahead of the fallback
    pub async fn push_answer(&self, text: &str, confidence: u8) {
        self.script
            .lock()
            .await
            .push_back(Scripted::Output(answer_json(text, confidence)));
    }

    /// Queue one raw output ahead of the fallback
    pub async fn push_raw(&self, raw: &str) {
        self.script
            .lock()
            .await
            .push_back(Scripted::Output(raw.to_string()));
    }

    pub async fn dispatch_count(&self) -> usize {
        self.invocations.lock().await.len()
    }

    pub async fn last_invocation(&self) -> Option<AgentInvocation> {
        self.invocations.lock().await.last().cloned()
    }
}

/// Structured answer body in the shape the hub's parser expects
pub fn answer_json(text: &str, confidence: u8) -> String {
    serde_json::json!({
        "answer": text,
        "rationale": format!("Test rationale supporting: {text}"),
        "confidence": confidence,
        "uncertainty_reasons": if confidence < 80 {
            vec!["insufficient context in test fixture"]
        } else {
            vec![]
        },
    })
    .to_string()
}

#[async_trait]
impl AgentRunner for MockAgentRunner {
    async fn dispatch(
        &self,
        invocation: AgentInvocation,
        cancel: &CancelToken,
    ) -> Result<AgentRunOutput, AgentRunnerError> {
        if cancel.is_cancelled() {
            return Err(AgentRunnerError::Cancelled);
        }
        let agent_id = invocation.agent_id.clone();
        let timeout_secs = invocation.timeout.as_secs();
        self.invocations.lock().await.push(invocation);

        let scripted = {
            let mut script = self.script.lock().await;
            match script.pop_front() {
                Some(s) => s,
                None => self
                    .fallback
                    .lock()
                    .await
                    .clone()
                    .unwrap_or(Scripted::Unavailable("no scripted response".to_string())),
            }
        };

        match scripted {
            Scripted::Output(output) => Ok(AgentRunOutput {
                output,
                metadata: HashMap::new(),
            }),
            Scripted::Unavailable(message) => Err(AgentRunnerError::Unavailable { message }),
            Scripted::Timeout => Err(AgentRunnerError::Timeout {
                agent_id,
                timeout_secs,
            }),
        }
    }
}

// ========== Issue board ==========

#[derive(Default)]
struct BoardState {
    issues: HashMap<u64, Issue>,
    comments: HashMap<u64, Vec<IssueComment>>,
    next_issue: u64,
    next_comment: u64,
    rate_limit_next: Option<u64>,
    label_history: Vec<(u64, String, Vec<String>)>,
    base_time: Option<DateTime<Utc>>,
}

/// In-memory issue board with seedable comments and fault injection
#[derive(Clone, Default)]
pub struct InMemoryIssueBoard {
    state: Arc<Mutex<BoardState>>,
}

impl InMemoryIssueBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ticket directly and return its number
    pub async fn seed_issue(&self, title: &str) -> u64 {
        let mut state = self.state.lock().await;
        state.next_issue += 1;
        let number = state.next_issue;
        state.issues.insert(
            number,
            Issue {
                number,
                title: title.to_string(),
                body: String::new(),
                labels: Vec::new(),
            },
        );
        number
    }

    /// Append a comment with a strictly increasing creation time
    pub async fn seed_comment(&self, issue: u64, author: &str, body: &str) -> u64 {
        let mut state = self.state.lock().await;
        state.next_comment += 1;
        let id = state.next_comment;
        let base = *state.base_time.get_or_insert_with(Utc::now);
        let comment = IssueComment {
            id,
            author: author.to_string(),
            body: body.to_string(),
            created_at: base + ChronoDuration::seconds(id as i64),
        };
        state.comments.entry(issue).or_default().push(comment);
        id
    }

    /// Make the next `list_comments_since` call fail rate-limited once
    pub async fn rate_limit_next(&self, wait_seconds: u64) {
        self.state.lock().await.rate_limit_next = Some(wait_seconds);
    }

    pub async fn comments(&self, issue: u64) -> Vec<IssueComment> {
        self.state
            .lock()
            .await
            .comments
            .get(&issue)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn issue_labels(&self, issue: u64) -> Vec<String> {
        self.state
            .lock()
            .await
            .issues
            .get(&issue)
            .map(|i| i.labels.clone())
            .unwrap_or_default()
    }

    /// `(issue, op, labels)` rows, op ∈ {add, remove}
    pub async fn label_history(&self) -> Vec<(u64, String, Vec<String>)> {
        self.state.lock().await.label_history.clone()
    }
}

#[async_trait]
impl IssueBoard for InMemoryIssueBoard {
    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<Issue, IssueBoardError> {
        let mut state = self.state.lock().await;
        state.next_issue += 1;
        let number = state.next_issue;
        let issue = Issue {
            number,
            title: title.to_string(),
            body: body.to_string(),
            labels: labels.to_vec(),
        };
        state.issues.insert(number, issue.clone());
        Ok(issue)
    }

    async fn get_issue(&self, number: u64) -> Result<Issue, IssueBoardError> {
        self.state
            .lock()
            .await
            .issues
            .get(&number)
            .cloned()
            .ok_or(IssueBoardError::NotFound {
                resource: format!("issue #{number}"),
            })
    }

    async fn list_comments_since(
        &self,
        number: u64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<IssueComment>, IssueBoardError> {
        let mut state = self.state.lock().await;
        if let Some(wait_seconds) = state.rate_limit_next.take() {
            return Err(IssueBoardError::RateLimited { wait_seconds });
        }
        let mut comments: Vec<IssueComment> = state
            .comments
            .get(&number)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|c| since.map_or(true, |s| c.created_at > s))
            .collect();
        comments.sort_by_key(|c| (c.created_at, c.id));
        Ok(comments)
    }

    async fn add_comment(&self, number: u64, body: &str) -> Result<u64, IssueBoardError> {
        Ok(self.seed_comment(number, "specflow[bot]", body).await)
    }

    async fn add_labels(&self, number: u64, labels: &[String]) -> Result<(), IssueBoardError> {
        let mut state = self.state.lock().await;
        state
            .label_history
            .push((number, "add".to_string(), labels.to_vec()));
        if let Some(issue) = state.issues.get_mut(&number) {
            for label in labels {
                if !issue.labels.contains(label) {
                    issue.labels.push(label.clone());
                }
            }
        }
        Ok(())
    }

    async fn remove_labels(&self, number: u64, labels: &[String]) -> Result<(), IssueBoardError> {
        let mut state = self.state.lock().await;
        state
            .label_history
            .push((number, "remove".to_string(), labels.to_vec()));
        if let Some(issue) = state.issues.get_mut(&number) {
            issue.labels.retain(|l| !labels.contains(l));
        }
        Ok(())
    }
}

// ========== Workspace ==========

#[derive(Default)]
struct WorkspaceState {
    branches: HashSet<String>,
    worktrees: HashMap<String, PathBuf>,
    artifact_trees: HashSet<String>,
    commits: Vec<(String, String)>,
    calls: Vec<String>,
}

/// Recording workspace manager; branch and worktree creation fail on repeats
#[derive(Clone, Default)]
pub struct MockWorkspace {
    state: Arc<Mutex<WorkspaceState>>,
}

impl MockWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn call_count(&self, op: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.as_str() == op)
            .count()
    }

    pub async fn has_branch(&self, name: &str) -> bool {
        self.state.lock().await.branches.contains(name)
    }

    pub async fn commits(&self) -> Vec<(String, String)> {
        self.state.lock().await.commits.clone()
    }
}

#[async_trait]
impl WorkspaceManager for MockWorkspace {
    async fn create_branch(&self, name: &str) -> Result<BranchRef, WorkspaceError> {
        let mut state = self.state.lock().await;
        state.calls.push("create_branch".to_string());
        if !state.branches.insert(name.to_string()) {
            return Err(WorkspaceError::BranchExists {
                branch: name.to_string(),
            });
        }
        Ok(BranchRef {
            name: name.to_string(),
            created: true,
        })
    }

    async fn create_worktree(&self, branch: &str) -> Result<WorktreeRef, WorkspaceError> {
        let mut state = self.state.lock().await;
        state.calls.push("create_worktree".to_string());
        if state.worktrees.contains_key(branch) {
            return Err(WorkspaceError::PathExists {
                path: format!("/worktrees/{branch}"),
            });
        }
        let path = PathBuf::from(format!("/worktrees/{branch}"));
        state.worktrees.insert(branch.to_string(), path.clone());
        Ok(WorktreeRef {
            path,
            branch: branch.to_string(),
        })
    }

    async fn init_artifact_tree(&self, feature_id: &str) -> Result<PathBuf, WorkspaceError> {
        let mut state = self.state.lock().await;
        state.calls.push("init_artifact_tree".to_string());
        // Idempotent: repeat initialization is a no-op
        state.artifact_trees.insert(feature_id.to_string());
        Ok(PathBuf::from(format!("/plans/{feature_id}")))
    }

    async fn commit_and_push(&self, branch: &str, message: &str) -> Result<(), WorkspaceError> {
        let mut state = self.state.lock().await;
        state.calls.push("commit_and_push".to_string());
        state.commits.push((branch.to_string(), message.to_string()));
        Ok(())
    }

    async fn remove_worktree(&self, branch: &str) -> Result<(), WorkspaceError> {
        let mut state = self.state.lock().await;
        state.calls.push("remove_worktree".to_string());
        state.worktrees.remove(branch);
        state.branches.remove(branch);
        Ok(())
    }
}

// ========== Clock ==========

/// Manually advanced clock for deterministic timestamps
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<std::sync::Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(std::sync::Mutex::new(start)),
        }
    }

    pub fn starting_at_epoch() -> Self {
        Self::new("2025-01-01T00:00:00Z".parse().unwrap())
    }

    pub fn advance(&self, duration: ChronoDuration) {
        let mut now = self.now.lock().unwrap();
        *now += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
