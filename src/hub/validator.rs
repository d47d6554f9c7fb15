//! Confidence gate: accept an answer or escalate it for human review

use crate::config::{RoutingSettings, ThresholdSource};
use crate::model::Answer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of validating an answer against its topic threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    Accepted,
    Escalate,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub outcome: ValidationOutcome,
    pub threshold_used: u8,
    pub threshold_source: ThresholdSource,
}

/// Validates answers against per-topic confidence thresholds
pub struct ConfidenceValidator {
    routing: Arc<RoutingSettings>,
}

impl ConfidenceValidator {
    pub fn new(routing: Arc<RoutingSettings>) -> Self {
        Self { routing }
    }

    /// Confidence at or above the threshold is accepted; below escalates
    pub fn validate(&self, answer: &Answer, topic: &str) -> ValidationResult {
        let (threshold_used, threshold_source) = self.routing.threshold_for_topic(topic);
        let outcome = if answer.confidence >= threshold_used {
            ValidationOutcome::Accepted
        } else {
            ValidationOutcome::Escalate
        };
        ValidationResult {
            outcome,
            threshold_used,
            threshold_source,
        }
    }
}
