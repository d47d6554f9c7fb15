//! Escalation lifecycle: create on low confidence, resolve via human action
//!
//! Three human actions close an escalation: `confirm` accepts the tentative
//! answer, `correct` replaces it with full-confidence human text, and
//! `add_context` hands back an updated question for a reroute.

use crate::adapters::Clock;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::{
    Answer, Escalation, EscalationStatus, HumanAction, Question,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Result of processing a human response to an escalation
#[derive(Debug, Clone)]
pub struct EscalationResolution {
    pub escalation_id: String,
    pub action_taken: HumanAction,
    pub escalation_resolved: bool,
    pub final_answer: Option<Answer>,
    pub needs_reroute: bool,
    pub updated_question: Option<Question>,
}

/// In-memory escalation store
pub struct EscalationStore {
    clock: Arc<dyn Clock>,
    escalations: RwLock<HashMap<String, Escalation>>,
}

impl EscalationStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            escalations: RwLock::new(HashMap::new()),
        }
    }

    /// Open a pending escalation for a low-confidence exchange
    pub async fn create(
        &self,
        question: Question,
        tentative_answer: Answer,
        threshold_used: u8,
        session_id: Option<String>,
        audit_record_id: Option<String>,
    ) -> Escalation {
        let escalation = Escalation {
            id: Uuid::new_v4().to_string(),
            question,
            tentative_answer,
            threshold_used,
            status: EscalationStatus::Pending,
            created_at: self.clock.now(),
            session_id,
            audit_record_id,
            responder: None,
            human_action: None,
            human_payload: None,
        };
        self.escalations
            .write()
            .await
            .insert(escalation.id.clone(), escalation.clone());
        escalation
    }

    pub async fn get(&self, escalation_id: &str) -> OrchestratorResult<Escalation> {
        self.escalations
            .read()
            .await
            .get(escalation_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::EscalationNotFound {
                escalation_id: escalation_id.to_string(),
            })
    }

    /// Apply a human action. Resolving twice fails with
    /// `ESCALATION_ALREADY_RESOLVED`.
    pub async fn resolve(
        &self,
        escalation_id: &str,
        action: HumanAction,
        responder: &str,
        payload: Option<&str>,
    ) -> OrchestratorResult<(Escalation, EscalationResolution)> {
        let mut escalations = self.escalations.write().await;
        let escalation = escalations.get_mut(escalation_id).ok_or_else(|| {
            OrchestratorError::EscalationNotFound {
                escalation_id: escalation_id.to_string(),
            }
        })?;
        if escalation.is_resolved() {
            return Err(OrchestratorError::EscalationAlreadyResolved {
                escalation_id: escalation_id.to_string(),
            });
        }

        let responder = normalize_responder(responder);
        let resolution = match action {
            HumanAction::Confirm => EscalationResolution {
                escalation_id: escalation_id.to_string(),
                action_taken: HumanAction::Confirm,
                escalation_resolved: true,
                final_answer: Some(escalation.tentative_answer.clone()),
                needs_reroute: false,
                updated_question: None,
            },
            HumanAction::Correct => {
                let original_agent = escalation.tentative_answer.answered_by.clone();
                let text = payload
                    .map(String::from)
                    .unwrap_or_else(|| escalation.tentative_answer.text.clone());
                let final_answer = Answer {
                    question_id: escalation.question.id.clone(),
                    answered_by: responder.clone(),
                    text,
                    rationale: format!(
                        "Human-corrected answer replacing original from {original_agent}. \
                         Human review required due to low confidence."
                    ),
                    confidence: 100,
                    uncertainty_reasons: Vec::new(),
                    model_used: "human".to_string(),
                    duration_seconds: 0.0,
                };
                EscalationResolution {
                    escalation_id: escalation_id.to_string(),
                    action_taken: HumanAction::Correct,
                    escalation_resolved: true,
                    final_answer: Some(final_answer),
                    needs_reroute: false,
                    updated_question: None,
                }
            }
            HumanAction::AddContext => {
                let additional = payload.ok_or_else(|| {
                    OrchestratorError::internal("add_context resolution requires a payload")
                })?;
                let updated_question = escalation
                    .question
                    .with_additional_context(Uuid::new_v4().to_string(), additional);
                EscalationResolution {
                    escalation_id: escalation_id.to_string(),
                    action_taken: HumanAction::AddContext,
                    escalation_resolved: true,
                    final_answer: None,
                    needs_reroute: true,
                    updated_question: Some(updated_question),
                }
            }
        };

        escalation.status = EscalationStatus::Resolved;
        escalation.responder = Some(responder);
        escalation.human_action = Some(action);
        escalation.human_payload = payload.map(String::from);

        Ok((escalation.clone(), resolution))
    }
}

/// Ensure a responder handle carries exactly one leading `@`
pub fn normalize_responder(responder: &str) -> String {
    if responder.starts_with('@') {
        responder.to_string()
    } else {
        format!("@{responder}")
    }
}

/// Render an escalation as a markdown comment for the feature ticket
pub fn format_board_comment(escalation: &Escalation) -> String {
    let answer = &escalation.tentative_answer;
    let question = &escalation.question;

    let uncertainty_section = if answer.uncertainty_reasons.is_empty() {
        String::new()
    } else {
        let reasons: Vec<String> = answer
            .uncertainty_reasons
            .iter()
            .map(|r| format!("- {r}"))
            .collect();
        format!("\n\n**Uncertainty reasons:**\n{}", reasons.join("\n"))
    };

    let context_section = if question.context.is_empty() {
        String::new()
    } else {
        format!("**Context:** {}\n", question.context)
    };

    format!(
        r#"## :warning: Low Confidence Answer - Human Review Required

**Topic:** `{topic}`
**Confidence:** {confidence}% (threshold: {threshold}%)

### Question
{question_text}

{context_section}
### Tentative Answer
{answer_text}

**Rationale:** {rationale}{uncertainty_section}

---

### Actions

Please respond with one of the following:
- `/confirm` - Accept this answer as-is
- `/correct <your answer>` - Provide the correct answer
- `/context <additional info>` - Add context and retry the question

**Answered by:** {answered_by} ({model})
"#,
        topic = question.topic,
        confidence = answer.confidence,
        threshold = escalation.threshold_used,
        question_text = question.text,
        answer_text = answer.text,
        rationale = answer.rationale,
        answered_by = answer.answered_by,
        model = answer.model_used,
    )
}
