//! Issue board capability: tickets, comments, and labels
//!
//! The poller consumes `list_comments_since`; the phase executor opens
//! tickets and mirrors status labels. Rate limiting is a typed error carrying
//! the wait hint so callers can back off.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A ticket on the external board
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// A comment on a ticket, ordered by creation time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueComment {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Error)]
pub enum IssueBoardError {
    #[error("Board not configured: {message}")]
    NotConfigured { message: String },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Rate limit exceeded; wait {wait_seconds}s")]
    RateLimited { wait_seconds: u64 },

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Authentication failed: {message}")]
    Auth { message: String },
}

#[async_trait]
pub trait IssueBoard: Send + Sync {
    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<Issue, IssueBoardError>;

    async fn get_issue(&self, number: u64) -> Result<Issue, IssueBoardError>;

    /// Comments created strictly after `since`, oldest first; `None` returns
    /// the full comment feed.
    async fn list_comments_since(
        &self,
        number: u64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<IssueComment>, IssueBoardError>;

    /// Returns the new comment's id
    async fn add_comment(&self, number: u64, body: &str) -> Result<u64, IssueBoardError>;

    async fn add_labels(&self, number: u64, labels: &[String]) -> Result<(), IssueBoardError>;

    async fn remove_labels(&self, number: u64, labels: &[String]) -> Result<(), IssueBoardError>;
}
