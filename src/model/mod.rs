//! Core domain types shared across the workflow engine, agent hub, and poller
//!
//! Entities are identified by opaque UUID-shaped string ids. Cross-entity
//! references (session ↔ escalation ↔ audit record) are held as ids and
//! resolved through the owning store, never as back-pointers.

pub mod audit;
pub mod escalation;
pub mod question;
pub mod session;
pub mod workflow;

pub use audit::{AuditRecord, AuditStatus};
pub use escalation::{Escalation, EscalationStatus, HumanAction};
pub use question::{Answer, Question};
pub use session::{Message, MessageRole, Session, SessionStatus};
pub use workflow::{Trigger, Workflow, WorkflowHistory, WorkflowStatus, WorkflowType};
