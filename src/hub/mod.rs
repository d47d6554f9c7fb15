//! Agent Hub: expert routing, confidence validation, and escalation tracking
//!
//! The single entry point for topic-based expert questions. A question is
//! routed to its expert agent, the answer runs through the confidence gate,
//! low-confidence answers open human-review escalations, and every exchange
//! lands in the audit sink before the response returns.

mod escalation;
mod hub;
mod router;
mod session;
mod validator;

pub use escalation::{EscalationResolution, EscalationStore};
pub use hub::{AgentHub, AskRequest, HubResponse, ResponseStatus};
pub use router::{ExpertRouter, KNOWLEDGE_AGENT_SYSTEM_PROMPT};
pub use session::SessionManager;
pub use validator::{ConfidenceValidator, ValidationOutcome, ValidationResult};
