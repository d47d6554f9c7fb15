//! Session management for multi-turn expert conversations

use crate::adapters::Clock;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::{Message, MessageRole, Session, SessionStatus};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory session store; message order is insertion order
pub struct SessionManager {
    clock: Arc<dyn Clock>,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session bound to an agent and feature
    pub async fn create(&self, agent_id: &str, feature_id: &str) -> Session {
        let now = self.clock.now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            feature_id: feature_id.to_string(),
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        };
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        session
    }

    pub async fn get(&self, session_id: &str) -> OrchestratorResult<Session> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    pub async fn exists(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// True when the session exists and still accepts messages
    pub async fn is_live(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| !s.is_closed())
            .unwrap_or(false)
    }

    /// Append a message; closed sessions reject the append
    pub async fn add_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        metadata: Map<String, Value>,
    ) -> OrchestratorResult<Message> {
        let mut sessions = self.sessions.write().await;
        let session =
            sessions
                .get_mut(session_id)
                .ok_or_else(|| OrchestratorError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
        if session.is_closed() {
            return Err(OrchestratorError::SessionClosed {
                session_id: session_id.to_string(),
            });
        }

        let message = Message {
            role,
            content: content.to_string(),
            timestamp: self.clock.now(),
            metadata,
        };
        session.messages.push(message.clone());
        session.updated_at = message.timestamp;
        Ok(message)
    }

    pub async fn close(&self, session_id: &str) -> OrchestratorResult<()> {
        let mut sessions = self.sessions.write().await;
        let session =
            sessions
                .get_mut(session_id)
                .ok_or_else(|| OrchestratorError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
        session.status = SessionStatus::Closed;
        session.updated_at = self.clock.now();
        Ok(())
    }

    pub async fn list_active(&self) -> Vec<Session> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| !s.is_closed())
            .cloned()
            .collect()
    }

    pub async fn by_feature(&self, feature_id: &str) -> Vec<Session> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.feature_id == feature_id)
            .cloned()
            .collect()
    }
}
