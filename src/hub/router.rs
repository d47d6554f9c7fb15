//! Expert routing: prompt construction, agent dispatch, and answer parsing
//!
//! Agents answer in a structured JSON shape. The parser accepts a bare JSON
//! object, a fenced ```json block, or falls back to the first `{...}` span in
//! the output; anything else is an invalid response.

use crate::adapters::{AgentInvocation, AgentRunner, CancelToken, Clock};
use crate::config::RoutingSettings;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::question::{clamp_confidence, MIN_RATIONALE_LEN};
use crate::model::{Answer, Message, Question};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How many trailing session messages are replayed into the prompt
const HISTORY_WINDOW: usize = 10;

/// System prompt contract for knowledge agents
pub const KNOWLEDGE_AGENT_SYSTEM_PROMPT: &str = r#"You are {agent_name}, the {agent_role} expert.

Answer the question below. Your response MUST be valid JSON with this structure:
{
  "answer": "your answer here",
  "rationale": "why you believe this is correct (at least 20 characters)",
  "confidence": 85,
  "uncertainty_reasons": ["reason 1", "reason 2"]
}

Base your confidence on:
- 90-100: You have specific knowledge/documentation about this
- 70-89: You're making an informed inference based on patterns
- 50-69: You have general knowledge but significant uncertainty
- 0-49: You're guessing, recommend human input

If confidence < 100, include uncertainty_reasons explaining what you don't know."#;

/// Dispatches questions to expert agents and parses their answers
pub struct ExpertRouter {
    routing: Arc<RoutingSettings>,
    runner: Arc<dyn AgentRunner>,
    clock: Arc<dyn Clock>,
}

impl ExpertRouter {
    pub fn new(
        routing: Arc<RoutingSettings>,
        runner: Arc<dyn AgentRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            routing,
            runner,
            clock,
        }
    }

    /// Dispatch a question to the resolved agent and parse the answer
    pub async fn dispatch(
        &self,
        question: &Question,
        agent_id: &str,
        history: &[Message],
        cancel: &CancelToken,
    ) -> OrchestratorResult<Answer> {
        let agent_name = self.routing.display_name(agent_id);
        let model = self.routing.model_for(&question.topic, agent_id);
        let timeout_secs = self.routing.timeout_for_agent(agent_id);

        let invocation = AgentInvocation {
            agent_id: agent_id.to_string(),
            system_prompt: self.build_system_prompt(&agent_name, agent_id),
            user_prompt: self.build_user_prompt(question, history),
            model: model.clone(),
            tools: Vec::new(),
            timeout: Duration::from_secs(timeout_secs),
        };

        debug!(
            agent_id,
            topic = %question.topic,
            question_id = %question.id,
            %model,
            "dispatching question to expert"
        );

        let started = self.clock.now();
        let run = self.runner.dispatch(invocation, cancel).await?;
        let duration_seconds = (self.clock.now() - started)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;

        self.parse_answer(&run.output, question, &agent_name, &model, duration_seconds)
    }

    fn build_system_prompt(&self, agent_name: &str, agent_role: &str) -> String {
        KNOWLEDGE_AGENT_SYSTEM_PROMPT
            .replace("{agent_name}", agent_name)
            .replace("{agent_role}", agent_role)
    }

    fn build_user_prompt(&self, question: &Question, history: &[Message]) -> String {
        let mut prompt = String::new();

        if !history.is_empty() {
            prompt.push_str("Conversation so far:\n");
            let start = history.len().saturating_sub(HISTORY_WINDOW);
            for message in &history[start..] {
                prompt.push_str(&format!("{}: {}\n", message.role, message.content));
            }
            prompt.push('\n');
        }

        prompt.push_str(&format!("Question: {}\n", question.text));
        if !question.context.is_empty() {
            prompt.push_str(&format!("\nContext: {}\n", question.context));
        }
        prompt
    }

    /// Parse raw agent output into an [`Answer`], enforcing the field contract
    pub fn parse_answer(
        &self,
        raw: &str,
        question: &Question,
        agent_name: &str,
        model: &str,
        duration_seconds: f64,
    ) -> OrchestratorResult<Answer> {
        let data = extract_json(raw).ok_or_else(|| {
            OrchestratorError::agent_response_invalid("no JSON object found in agent output")
        })?;

        let object = data.as_object().ok_or_else(|| {
            OrchestratorError::agent_response_invalid("agent output is not a JSON object")
        })?;

        for field in ["answer", "rationale", "confidence"] {
            if !object.contains_key(field) {
                return Err(OrchestratorError::agent_response_invalid(format!(
                    "missing required field: {field}"
                )));
            }
        }

        let text = object
            .get("answer")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::agent_response_invalid("'answer' must be a string"))?
            .to_string();
        let rationale = object
            .get("rationale")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                OrchestratorError::agent_response_invalid("'rationale' must be a string")
            })?
            .to_string();
        if rationale.len() < MIN_RATIONALE_LEN {
            return Err(OrchestratorError::agent_response_invalid(format!(
                "rationale shorter than {MIN_RATIONALE_LEN} characters"
            )));
        }

        let confidence_raw = object
            .get("confidence")
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64)))
            .ok_or_else(|| {
                OrchestratorError::agent_response_invalid("'confidence' must be a number")
            })?;
        let confidence = clamp_confidence(confidence_raw);

        let uncertainty_reasons = object
            .get("uncertainty_reasons")
            .and_then(|v| v.as_array())
            .map(|reasons| {
                reasons
                    .iter()
                    .filter_map(|r| r.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Answer {
            question_id: question.id.clone(),
            answered_by: agent_name.to_string(),
            text,
            rationale,
            confidence,
            uncertainty_reasons,
            model_used: model.to_string(),
            duration_seconds,
        })
    }
}

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());

/// Extract a JSON object from free-form agent text
fn extract_json(text: &str) -> Option<serde_json::Value> {
    // Bare JSON object
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text.trim()) {
        if value.is_object() {
            return Some(value);
        }
    }

    // Fenced code block
    if let Some(captures) = FENCED_JSON.captures(text) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&captures[1]) {
            return Some(value);
        }
    }

    // First `{...}` span
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text[start..=end]) {
            return Some(value);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SystemClock;
    use crate::config::SpecflowConfig;
    use crate::testing::mocks::MockAgentRunner;

    fn router() -> ExpertRouter {
        ExpertRouter::new(
            Arc::new(SpecflowConfig::test_config().routing),
            Arc::new(MockAgentRunner::default()),
            Arc::new(SystemClock),
        )
    }

    fn question() -> Question {
        Question {
            id: "q-1".to_string(),
            topic: "architecture".to_string(),
            text: "Which database?".to_string(),
            context: String::new(),
            feature_id: "001-add-auth".to_string(),
            suggested_target: None,
        }
    }

    const VALID_BODY: &str = r#"{"answer": "Postgres", "rationale": "Fits the team's operational experience.", "confidence": 88}"#;

    #[test]
    fn test_parse_bare_json() {
        let answer = router()
            .parse_answer(VALID_BODY, &question(), "@duc", "opus", 1.5)
            .unwrap();
        assert_eq!(answer.text, "Postgres");
        assert_eq!(answer.confidence, 88);
        assert_eq!(answer.answered_by, "@duc");
        assert_eq!(answer.model_used, "opus");
        assert_eq!(answer.question_id, "q-1");
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = format!("Here is my answer:\n```json\n{VALID_BODY}\n```\nHope that helps.");
        let answer = router()
            .parse_answer(&raw, &question(), "@duc", "opus", 0.0)
            .unwrap();
        assert_eq!(answer.text, "Postgres");
    }

    #[test]
    fn test_parse_embedded_span() {
        let raw = format!("Thinking out loud... {VALID_BODY} -- done");
        let answer = router()
            .parse_answer(&raw, &question(), "@duc", "opus", 0.0)
            .unwrap();
        assert_eq!(answer.confidence, 88);
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let raw = r#"{"answer": "Postgres", "confidence": 88}"#;
        let result = router().parse_answer(raw, &question(), "@duc", "opus", 0.0);
        assert!(matches!(
            result,
            Err(OrchestratorError::AgentResponseInvalid { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_short_rationale() {
        let raw = r#"{"answer": "Postgres", "rationale": "because", "confidence": 88}"#;
        let result = router().parse_answer(raw, &question(), "@duc", "opus", 0.0);
        assert!(matches!(
            result,
            Err(OrchestratorError::AgentResponseInvalid { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let result = router().parse_answer("no json here", &question(), "@duc", "opus", 0.0);
        assert!(matches!(
            result,
            Err(OrchestratorError::AgentResponseInvalid { .. })
        ));
    }

    #[test]
    fn test_parse_clamps_out_of_range_confidence() {
        let raw = r#"{"answer": "x", "rationale": "a sufficiently long rationale", "confidence": 250}"#;
        let answer = router()
            .parse_answer(raw, &question(), "@duc", "opus", 0.0)
            .unwrap();
        assert_eq!(answer.confidence, 100);
    }

    #[test]
    fn test_parse_collects_uncertainty_reasons() {
        let raw = r#"{"answer": "x", "rationale": "a sufficiently long rationale", "confidence": 60, "uncertainty_reasons": ["no load data", "new domain"]}"#;
        let answer = router()
            .parse_answer(raw, &question(), "@duc", "opus", 0.0)
            .unwrap();
        assert_eq!(answer.uncertainty_reasons.len(), 2);
    }

    #[test]
    fn test_user_prompt_includes_history_and_context() {
        let router = router();
        let mut question = question();
        question.context = "Greenfield service.".to_string();

        let history = vec![Message {
            role: crate::model::MessageRole::User,
            content: "Earlier question".to_string(),
            timestamp: chrono::Utc::now(),
            metadata: serde_json::Map::new(),
        }];

        let prompt = router.build_user_prompt(&question, &history);
        assert!(prompt.contains("Conversation so far:"));
        assert!(prompt.contains("user: Earlier question"));
        assert!(prompt.contains("Question: Which database?"));
        assert!(prompt.contains("Context: Greenfield service."));
    }

    #[test]
    fn test_system_prompt_substitutes_identity() {
        let router = router();
        let prompt = router.build_system_prompt("@duc", "architect");
        assert!(prompt.contains("You are @duc, the architect expert."));
        assert!(!prompt.contains("{agent_name}"));
    }
}
