//! Error taxonomy for workflow orchestration
//!
//! Every user-visible failure carries a machine-readable [`ErrorCode`] and a
//! human-legible message. Adapter errors are either mapped onto a specific
//! code or propagated with their cause; nothing is silently swallowed.

use crate::adapters::{AgentRunnerError, IssueBoardError, WorkspaceError};
use crate::config::ConfigError;
use crate::model::{Trigger, WorkflowStatus};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error codes surfaced to callers and audit consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    WorkflowNotFound,
    InvalidStateTransition,
    InvalidWorkflowType,
    UnknownTopic,
    SessionNotFound,
    SessionClosed,
    EscalationNotFound,
    EscalationAlreadyResolved,
    AgentUnavailable,
    AgentTimeout,
    AgentResponseInvalid,
    PollTimeout,
    RateLimitExceeded,
    PersistenceCorrupted,
    InternalError,
}

/// Main error type for orchestrator, hub, and poller operations
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Workflow {workflow_id} not found")]
    WorkflowNotFound { workflow_id: String },

    #[error("Invalid transition from {from} via trigger '{trigger}'")]
    InvalidStateTransition {
        from: WorkflowStatus,
        trigger: Trigger,
    },

    #[error("Invalid workflow type: '{value}' (expected specify, plan, tasks, or implement)")]
    InvalidWorkflowType { value: String },

    #[error("Unknown topic '{topic}'; available topics: {}", available.join(", "))]
    UnknownTopic {
        topic: String,
        available: Vec<String>,
    },

    #[error("Session {session_id} not found")]
    SessionNotFound { session_id: String },

    #[error("Session {session_id} is closed and rejects new messages")]
    SessionClosed { session_id: String },

    #[error("Escalation {escalation_id} not found")]
    EscalationNotFound { escalation_id: String },

    #[error("Escalation {escalation_id} is already resolved")]
    EscalationAlreadyResolved { escalation_id: String },

    #[error("Agent unavailable: {message}")]
    AgentUnavailable { message: String },

    #[error("Agent {agent_id} timed out after {timeout_secs}s")]
    AgentTimeout { agent_id: String, timeout_secs: u64 },

    #[error("Agent response invalid: {message}")]
    AgentResponseInvalid { message: String },

    #[error("Polling for {signal} on ticket #{ticket} timed out after {timeout_secs}s")]
    PollTimeout {
        signal: String,
        ticket: u64,
        timeout_secs: u64,
    },

    #[error("Rate limit exceeded; retry after {wait_seconds}s")]
    RateLimitExceeded { wait_seconds: u64 },

    #[error("Persisted state corrupted for workflow {workflow_id}: {message}")]
    PersistenceCorrupted {
        workflow_id: String,
        message: String,
    },

    #[error("Issue board error: {0}")]
    Board(IssueBoardError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl OrchestratorError {
    /// Map this error onto its machine-readable code
    pub fn code(&self) -> ErrorCode {
        match self {
            OrchestratorError::WorkflowNotFound { .. } => ErrorCode::WorkflowNotFound,
            OrchestratorError::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
            OrchestratorError::InvalidWorkflowType { .. } => ErrorCode::InvalidWorkflowType,
            OrchestratorError::UnknownTopic { .. } => ErrorCode::UnknownTopic,
            OrchestratorError::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            OrchestratorError::SessionClosed { .. } => ErrorCode::SessionClosed,
            OrchestratorError::EscalationNotFound { .. } => ErrorCode::EscalationNotFound,
            OrchestratorError::EscalationAlreadyResolved { .. } => {
                ErrorCode::EscalationAlreadyResolved
            }
            OrchestratorError::AgentUnavailable { .. } => ErrorCode::AgentUnavailable,
            OrchestratorError::AgentTimeout { .. } => ErrorCode::AgentTimeout,
            OrchestratorError::AgentResponseInvalid { .. } => ErrorCode::AgentResponseInvalid,
            OrchestratorError::PollTimeout { .. } => ErrorCode::PollTimeout,
            OrchestratorError::RateLimitExceeded { .. } => ErrorCode::RateLimitExceeded,
            OrchestratorError::PersistenceCorrupted { .. } => ErrorCode::PersistenceCorrupted,
            OrchestratorError::Board(_)
            | OrchestratorError::Workspace(_)
            | OrchestratorError::Config(_)
            | OrchestratorError::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// Sanitized, user-visible rendering: `CODE: message`
    pub fn user_message(&self) -> String {
        let code = serde_json::to_string(&self.code())
            .map(|s| s.trim_matches('"').to_string())
            .unwrap_or_else(|_| "INTERNAL_ERROR".to_string());
        format!("{code}: {}", sanitize_error_message(&self.to_string()))
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn agent_unavailable<S: Into<String>>(message: S) -> Self {
        Self::AgentUnavailable {
            message: message.into(),
        }
    }

    pub fn agent_response_invalid<S: Into<String>>(message: S) -> Self {
        Self::AgentResponseInvalid {
            message: message.into(),
        }
    }
}

impl From<IssueBoardError> for OrchestratorError {
    fn from(err: IssueBoardError) -> Self {
        match err {
            IssueBoardError::RateLimited { wait_seconds } => {
                OrchestratorError::RateLimitExceeded { wait_seconds }
            }
            other => OrchestratorError::Board(other),
        }
    }
}

impl From<AgentRunnerError> for OrchestratorError {
    fn from(err: AgentRunnerError) -> Self {
        match err {
            AgentRunnerError::Timeout {
                agent_id,
                timeout_secs,
            } => OrchestratorError::AgentTimeout {
                agent_id,
                timeout_secs,
            },
            AgentRunnerError::Unavailable { message } => {
                OrchestratorError::AgentUnavailable { message }
            }
            AgentRunnerError::Cancelled => OrchestratorError::AgentUnavailable {
                message: "dispatch cancelled".to_string(),
            },
        }
    }
}

static SECRET_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").unwrap());
static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+").unwrap()
});

/// Sanitize error messages before they leave the process boundary
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN.replace_all(message, "${1}=***").to_string();
    sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let max_content_len = 500 - truncate_suffix.len();
        let mut cut = max_content_len;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
