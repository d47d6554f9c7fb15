//! The Agent Hub itself: ask_expert pipeline and escalation resolution

use super::escalation::{format_board_comment, EscalationResolution, EscalationStore};
use super::router::ExpertRouter;
use super::session::SessionManager;
use super::validator::{ConfidenceValidator, ValidationOutcome, ValidationResult};
use crate::adapters::{AgentRunner, CancelToken, Clock};
use crate::audit::AuditSink;
use crate::config::{RoutingSettings, HUMAN_AGENT};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::audit::{AuditRecord, AuditStatus};
use crate::model::{Answer, Escalation, HumanAction, MessageRole, Question, Session};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Feature partition used when the caller does not name one
const DEFAULT_FEATURE_ID: &str = "000-default";

/// One `ask_expert` call
#[derive(Debug, Clone)]
pub struct AskRequest {
    pub topic: String,
    pub question: String,
    pub context: String,
    pub feature_id: String,
    pub session_id: Option<String>,
}

impl AskRequest {
    pub fn new(topic: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            question: question.into(),
            context: String::new(),
            feature_id: String::new(),
            session_id: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_feature_id(mut self, feature_id: impl Into<String>) -> Self {
        self.feature_id = feature_id.into();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Terminal status of a hub response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Resolved,
    PendingHuman,
}

/// What the hub hands back for every exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubResponse {
    pub answer: String,
    pub rationale: String,
    pub confidence: u8,
    pub uncertainty_reasons: Vec<String>,
    pub session_id: String,
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_id: Option<String>,
}

/// Central coordination layer for expert questions
pub struct AgentHub {
    routing: Arc<RoutingSettings>,
    router: ExpertRouter,
    validator: ConfidenceValidator,
    sessions: SessionManager,
    escalations: EscalationStore,
    audit: Arc<AuditSink>,
    clock: Arc<dyn Clock>,
    /// question id → parent audit record id, armed by add_context reroutes
    reroute_parents: RwLock<HashMap<String, String>>,
    /// per-session serialization of ask_expert
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AgentHub {
    pub fn new(
        routing: Arc<RoutingSettings>,
        runner: Arc<dyn AgentRunner>,
        audit: Arc<AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            router: ExpertRouter::new(routing.clone(), runner, clock.clone()),
            validator: ConfidenceValidator::new(routing.clone()),
            sessions: SessionManager::new(clock.clone()),
            escalations: EscalationStore::new(clock.clone()),
            routing,
            audit,
            clock,
            reroute_parents: RwLock::new(HashMap::new()),
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Route a question to the topic's expert agent.
    ///
    /// Resolves (or creates) the session, dispatches the agent, runs the
    /// answer through the confidence gate, and writes the audit record before
    /// returning. Low-confidence answers come back as `pending_human` with a
    /// fresh escalation id.
    pub async fn ask_expert(&self, request: AskRequest) -> OrchestratorResult<HubResponse> {
        let feature_id = if request.feature_id.is_empty() {
            DEFAULT_FEATURE_ID.to_string()
        } else {
            request.feature_id.clone()
        };
        let question = Question {
            id: Uuid::new_v4().to_string(),
            topic: request.topic.clone(),
            text: request.question.clone(),
            context: request.context.clone(),
            feature_id,
            suggested_target: None,
        };
        self.ask_question(question, request.session_id).await
    }

    /// Ask with a pre-built question; used to re-issue the updated question
    /// returned by an `add_context` resolution.
    pub async fn ask_question(
        &self,
        question: Question,
        session_id: Option<String>,
    ) -> OrchestratorResult<HubResponse> {
        if !self.routing.is_known_topic(&question.topic) {
            return Err(OrchestratorError::UnknownTopic {
                topic: question.topic.clone(),
                available: self.routing.all_topics(),
            });
        }

        let agent_id = self.routing.agent_for_topic(&question.topic);

        // Reuse the caller's session only while it is still live
        let session_id = match session_id {
            Some(id) if self.sessions.is_live(&id).await => id,
            _ => {
                self.sessions
                    .create(&agent_id, &question.feature_id)
                    .await
                    .id
            }
        };

        let lock = self.session_lock(&session_id).await;
        let _guard = lock.lock().await;

        let parent_id = self.reroute_parents.write().await.remove(&question.id);

        if agent_id == HUMAN_AGENT {
            return self
                .route_to_human(question, &session_id, parent_id)
                .await;
        }

        let history = self.sessions.get(&session_id).await?.messages;
        let answer = self
            .router
            .dispatch(&question, &agent_id, &history, &CancelToken::new())
            .await?;

        self.append_exchange_messages(&session_id, &question, &answer)
            .await?;

        let validation = self.validator.validate(&answer, &question.topic);
        let agent_name = self.routing.display_name(&agent_id);
        let routing_decision = format!(
            "Routed to {agent_id} ({agent_name}) based on topic '{}'",
            question.topic
        );

        match validation.outcome {
            ValidationOutcome::Accepted => {
                info!(
                    topic = %question.topic,
                    agent_id = %agent_id,
                    confidence = answer.confidence,
                    threshold = validation.threshold_used,
                    "answer accepted"
                );
                let record = self.build_audit_record(
                    &question,
                    &answer,
                    &validation,
                    AuditStatus::Resolved,
                    &session_id,
                    None,
                    parent_id,
                    &routing_decision,
                );
                self.audit.append(&record)?;

                Ok(HubResponse {
                    answer: answer.text,
                    rationale: answer.rationale,
                    confidence: answer.confidence,
                    uncertainty_reasons: answer.uncertainty_reasons,
                    session_id,
                    status: ResponseStatus::Resolved,
                    escalation_id: None,
                })
            }
            ValidationOutcome::Escalate => {
                warn!(
                    topic = %question.topic,
                    agent_id = %agent_id,
                    confidence = answer.confidence,
                    threshold = validation.threshold_used,
                    "low confidence, escalating to human"
                );
                // The audit id is minted first so the escalation and its
                // record reference each other from birth.
                let audit_record_id = Uuid::new_v4().to_string();
                let escalation = self
                    .escalations
                    .create(
                        question.clone(),
                        answer.clone(),
                        validation.threshold_used,
                        Some(session_id.clone()),
                        Some(audit_record_id.clone()),
                    )
                    .await;

                let mut record = self.build_audit_record(
                    &question,
                    &answer,
                    &validation,
                    AuditStatus::Escalated,
                    &session_id,
                    Some(escalation.id.clone()),
                    parent_id,
                    &format!("{routing_decision}, escalated due to low confidence"),
                );
                record.id = audit_record_id;
                self.audit.append(&record)?;

                Ok(HubResponse {
                    answer: answer.text,
                    rationale: answer.rationale,
                    confidence: answer.confidence,
                    uncertainty_reasons: answer.uncertainty_reasons,
                    session_id,
                    status: ResponseStatus::PendingHuman,
                    escalation_id: Some(escalation.id),
                })
            }
        }
    }

    /// Sentinel route: no agent is invoked, the exchange goes straight to a
    /// pending escalation.
    async fn route_to_human(
        &self,
        question: Question,
        session_id: &str,
        parent_id: Option<String>,
    ) -> OrchestratorResult<HubResponse> {
        let (threshold_used, threshold_source) =
            self.routing.threshold_for_topic(&question.topic);

        let mut user_metadata = Map::new();
        if !question.context.is_empty() {
            user_metadata.insert("context".to_string(), json!(question.context));
        }
        self.sessions
            .add_message(session_id, MessageRole::User, &question.text, user_metadata)
            .await?;

        let tentative = Answer {
            question_id: question.id.clone(),
            answered_by: HUMAN_AGENT.to_string(),
            text: String::new(),
            rationale: "Question requires direct human input".to_string(),
            confidence: 0,
            uncertainty_reasons: vec!["Question routed directly to human".to_string()],
            model_used: HUMAN_AGENT.to_string(),
            duration_seconds: 0.0,
        };

        let audit_record_id = Uuid::new_v4().to_string();
        let escalation = self
            .escalations
            .create(
                question.clone(),
                tentative.clone(),
                threshold_used,
                Some(session_id.to_string()),
                Some(audit_record_id.clone()),
            )
            .await;

        let validation = ValidationResult {
            outcome: ValidationOutcome::Escalate,
            threshold_used,
            threshold_source,
        };
        let mut record = self.build_audit_record(
            &question,
            &tentative,
            &validation,
            AuditStatus::Escalated,
            session_id,
            Some(escalation.id.clone()),
            parent_id,
            &format!(
                "Routed directly to human review for topic '{}'",
                question.topic
            ),
        );
        record.id = audit_record_id;
        self.audit.append(&record)?;

        info!(topic = %question.topic, escalation_id = %escalation.id, "routed to human");

        Ok(HubResponse {
            answer: String::new(),
            rationale: tentative.rationale,
            confidence: 0,
            uncertainty_reasons: tentative.uncertainty_reasons,
            session_id: session_id.to_string(),
            status: ResponseStatus::PendingHuman,
            escalation_id: Some(escalation.id),
        })
    }

    async fn append_exchange_messages(
        &self,
        session_id: &str,
        question: &Question,
        answer: &Answer,
    ) -> OrchestratorResult<()> {
        let mut user_metadata = Map::new();
        if !question.context.is_empty() {
            user_metadata.insert("context".to_string(), json!(question.context));
        }
        self.sessions
            .add_message(session_id, MessageRole::User, &question.text, user_metadata)
            .await?;

        let mut assistant_metadata = Map::new();
        assistant_metadata.insert("confidence".to_string(), json!(answer.confidence));
        assistant_metadata.insert("rationale".to_string(), json!(answer.rationale));
        assistant_metadata.insert("model".to_string(), json!(answer.model_used));
        self.sessions
            .add_message(
                session_id,
                MessageRole::Assistant,
                &answer.text,
                assistant_metadata,
            )
            .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_audit_record(
        &self,
        question: &Question,
        answer: &Answer,
        validation: &ValidationResult,
        status: AuditStatus,
        session_id: &str,
        escalation_id: Option<String>,
        parent_id: Option<String>,
        routing_decision: &str,
    ) -> AuditRecord {
        let mut metadata = Map::new();
        metadata.insert("routing".to_string(), json!(routing_decision));
        metadata.insert(
            "threshold_used".to_string(),
            json!(validation.threshold_used),
        );
        metadata.insert(
            "threshold_source".to_string(),
            json!(validation.threshold_source.as_str()),
        );
        metadata.insert("model".to_string(), json!(answer.model_used));

        AuditRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: self.clock.now(),
            feature_id: question.feature_id.clone(),
            topic: question.topic.clone(),
            question: question.text.clone(),
            answer: answer.text.clone(),
            confidence: answer.confidence,
            status,
            duration_ms: (answer.duration_seconds * 1000.0).max(0.0) as u64,
            session_id: Some(session_id.to_string()),
            escalation_id,
            parent_id,
            metadata,
        }
    }

    pub async fn get_session(&self, session_id: &str) -> OrchestratorResult<Session> {
        self.sessions.get(session_id).await
    }

    /// Closed sessions refuse further messages
    pub async fn close_session(&self, session_id: &str) -> OrchestratorResult<()> {
        self.sessions.close(session_id).await
    }

    pub async fn check_escalation(&self, escalation_id: &str) -> OrchestratorResult<Escalation> {
        self.escalations.get(escalation_id).await
    }

    /// Render an escalation as a markdown comment for the feature ticket
    pub async fn escalation_comment(&self, escalation_id: &str) -> OrchestratorResult<String> {
        let escalation = self.escalations.get(escalation_id).await?;
        Ok(format_board_comment(&escalation))
    }

    /// Apply a human action to a pending escalation.
    ///
    /// Appends a `human`-role message to the owning session and, for
    /// `add_context`, arms the reroute so the re-issued question's audit
    /// record chains to the escalated original via `parent_id`.
    pub async fn resolve_escalation(
        &self,
        escalation_id: &str,
        action: HumanAction,
        responder: &str,
        payload: Option<&str>,
    ) -> OrchestratorResult<EscalationResolution> {
        let escalation = self.escalations.get(escalation_id).await?;

        // Refuse up front rather than resolving and then failing the
        // session append.
        if let Some(session_id) = &escalation.session_id {
            let session = self.sessions.get(session_id).await?;
            if session.is_closed() {
                return Err(OrchestratorError::SessionClosed {
                    session_id: session_id.clone(),
                });
            }
        }

        let (resolved, resolution) = self
            .escalations
            .resolve(escalation_id, action, responder, payload)
            .await?;

        if let Some(session_id) = &resolved.session_id {
            let content = match action {
                HumanAction::Confirm => "Confirmed the tentative answer".to_string(),
                HumanAction::Correct => {
                    format!("Corrected answer: {}", payload.unwrap_or_default())
                }
                HumanAction::AddContext => {
                    format!("Added context: {}", payload.unwrap_or_default())
                }
            };
            let mut metadata = Map::new();
            metadata.insert(
                "responder".to_string(),
                json!(resolved.responder.clone().unwrap_or_default()),
            );
            metadata.insert("action".to_string(), json!(action.as_str()));
            metadata.insert("escalation_id".to_string(), json!(escalation_id));
            self.sessions
                .add_message(session_id, MessageRole::Human, &content, metadata)
                .await?;
        }

        if resolution.needs_reroute {
            if let (Some(updated), Some(parent)) = (
                resolution.updated_question.as_ref(),
                resolved.audit_record_id.clone(),
            ) {
                self.reroute_parents
                    .write()
                    .await
                    .insert(updated.id.clone(), parent);
            }
        }

        info!(
            escalation_id,
            action = %action,
            needs_reroute = resolution.needs_reroute,
            "escalation resolved"
        );
        Ok(resolution)
    }

    /// All audit records for a feature, oldest first
    pub fn audit_records(&self, feature_id: &str) -> OrchestratorResult<Vec<AuditRecord>> {
        self.audit.list(feature_id)
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
