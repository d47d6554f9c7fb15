//! Agent runner capability: dispatch a prompt to a language-model agent
//!
//! The runner is opaque to the hub; it returns raw text that the hub parses
//! into a structured answer. Implementations must honor the timeout and the
//! cancellation token.

use super::CancelToken;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// One dispatch request to a named agent
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub agent_id: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub model: String,
    /// Tool identifiers the agent is allowed to use; empty means none
    pub tools: Vec<String>,
    pub timeout: Duration,
}

/// Raw agent output plus transport metadata
#[derive(Debug, Clone, Default)]
pub struct AgentRunOutput {
    pub output: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Error)]
pub enum AgentRunnerError {
    #[error("Agent unavailable: {message}")]
    Unavailable { message: String },

    #[error("Agent {agent_id} timed out after {timeout_secs}s")]
    Timeout { agent_id: String, timeout_secs: u64 },

    #[error("Agent dispatch cancelled")]
    Cancelled,
}

#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Dispatch the invocation and wait for the agent's final output.
    ///
    /// Returns within the invocation timeout or when `cancel` fires.
    async fn dispatch(
        &self,
        invocation: AgentInvocation,
        cancel: &CancelToken,
    ) -> Result<AgentRunOutput, AgentRunnerError>;
}
