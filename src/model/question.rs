//! Questions routed to expert agents and the answers they return

use serde::{Deserialize, Serialize};

/// A topic-tagged question bound for an expert agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub topic: String,
    pub text: String,
    #[serde(default)]
    pub context: String,
    pub feature_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_target: Option<String>,
}

impl Question {
    /// Derive the follow-up question for an add-context reroute: same text
    /// and topic, fresh id, human context appended in a delimited block.
    pub fn with_additional_context(&self, new_id: String, additional: &str) -> Question {
        let context = if self.context.is_empty() {
            format!("Additional context from human:\n{additional}")
        } else {
            format!(
                "{}\n\nAdditional context from human:\n{additional}",
                self.context
            )
        };
        Question {
            id: new_id,
            topic: self.topic.clone(),
            text: self.text.clone(),
            context,
            feature_id: self.feature_id.clone(),
            suggested_target: self.suggested_target.clone(),
        }
    }
}

/// A structured agent answer with its self-reported confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: String,
    pub answered_by: String,
    pub text: String,
    pub rationale: String,
    /// Always within `[0, 100]`; clamp at construction sites
    pub confidence: u8,
    #[serde(default)]
    pub uncertainty_reasons: Vec<String>,
    pub model_used: String,
    #[serde(default)]
    pub duration_seconds: f64,
}

/// Minimum rationale length; shorter justifications are rejected as invalid
pub const MIN_RATIONALE_LEN: usize = 20;

/// Clamp a raw confidence value into the `[0, 100]` scale
pub fn clamp_confidence(raw: i64) -> u8 {
    raw.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_confidence_bounds() {
        assert_eq!(clamp_confidence(-5), 0);
        assert_eq!(clamp_confidence(0), 0);
        assert_eq!(clamp_confidence(85), 85);
        assert_eq!(clamp_confidence(100), 100);
        assert_eq!(clamp_confidence(250), 100);
    }

    #[test]
    fn test_with_additional_context_appends_delimited_block() {
        let question = Question {
            id: "q-1".to_string(),
            topic: "architecture".to_string(),
            text: "Which cache?".to_string(),
            context: "We already run Redis.".to_string(),
            feature_id: "001-add-auth".to_string(),
            suggested_target: None,
        };

        let updated = question.with_additional_context("q-2".to_string(), "Budget is tight.");
        assert_eq!(updated.id, "q-2");
        assert_eq!(updated.text, question.text);
        assert!(updated.context.starts_with("We already run Redis."));
        assert!(updated
            .context
            .contains("Additional context from human:\nBudget is tight."));
    }

    #[test]
    fn test_with_additional_context_on_empty_context() {
        let question = Question {
            id: "q-1".to_string(),
            topic: "testing".to_string(),
            text: "Coverage target?".to_string(),
            context: String::new(),
            feature_id: "002-coverage".to_string(),
            suggested_target: None,
        };

        let updated = question.with_additional_context("q-2".to_string(), "Aim for 80%.");
        assert_eq!(
            updated.context,
            "Additional context from human:\nAim for 80%."
        );
    }
}
