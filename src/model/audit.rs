//! Append-only audit records, one per expert exchange
//!
//! The wire shape is load-bearing for downstream consumers: newline-delimited
//! JSON objects with the mandatory keys `id`, `timestamp`, `feature_id`,
//! `topic`, `question`, `answer`, `confidence`, `status`, `duration_ms`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Outcome of the confidence gate for the recorded exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Resolved,
    Escalated,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Resolved => "resolved",
            AuditStatus::Escalated => "escalated",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable line in a feature's audit partition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub feature_id: String,
    pub topic: String,
    pub question: String,
    pub answer: String,
    pub confidence: u8,
    pub status: AuditStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_id: Option<String>,
    /// Links a rerouted follow-up exchange to the record it descends from.
    /// Must reference an earlier record in the same feature partition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}
