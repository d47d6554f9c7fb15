//! Human-review escalations opened for low-confidence answers

use crate::model::question::{Answer, Question};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationStatus {
    Pending,
    Resolved,
}

/// The three ways a human can resolve an escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanAction {
    Confirm,
    Correct,
    AddContext,
}

impl HumanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HumanAction::Confirm => "confirm",
            HumanAction::Correct => "correct",
            HumanAction::AddContext => "add_context",
        }
    }
}

impl fmt::Display for HumanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending request for human review of a low-confidence exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub id: String,
    pub question: Question,
    pub tentative_answer: Answer,
    pub threshold_used: u8,
    pub status: EscalationStatus,
    pub created_at: DateTime<Utc>,
    /// Session that produced the escalated exchange (weak reference by id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Audit record written for the escalated exchange; reroutes chain off it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_record_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_action: Option<HumanAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_payload: Option<String>,
}

impl Escalation {
    pub fn is_resolved(&self) -> bool {
        self.status == EscalationStatus::Resolved
    }
}
