//! specflow - Durable orchestration for multi-phase AI-assisted development
//!
//! # Overview
//!
//! A client submits a feature description; specflow drives it through an
//! ordered sequence of phases (specification, planning, task generation,
//! implementation), interleaving autonomous agent execution with human
//! approval gates. The crate provides:
//!
//! - A durable, resumable workflow state machine with an enforced transition
//!   table and append-only history
//! - An agent hub that routes domain topics to expert agents, gates answers
//!   on per-topic confidence thresholds, and escalates to humans
//! - A long-polling signal watcher over an issue board's comment feed
//! - An append-only JSONL audit sink partitioned by feature
//! - Capability traits (`AgentRunner`, `IssueBoard`, `WorkspaceManager`,
//!   `Clock`) with production adapters and in-memory mocks
//!
//! # Quick Start
//!
//! ```no_run
//! use specflow::adapters::{CancelToken, SystemClock};
//! use specflow::config::SpecflowConfig;
//! use specflow::testing::mocks::{InMemoryIssueBoard, MockAgentRunner, MockWorkspace};
//! use specflow::workflow::{Orchestrator, PhaseExecutor, WorkflowEngine, WorkflowStore};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SpecflowConfig::load_from_file("specflow.toml".as_ref())?;
//! let store = Arc::new(WorkflowStore::open(&config.orchestrator.state_dir)?);
//! let engine = Arc::new(WorkflowEngine::new(store, Arc::new(SystemClock)));
//!
//! let board = Arc::new(InMemoryIssueBoard::new());
//! let workspace = Arc::new(MockWorkspace::new());
//! let executor = PhaseExecutor::new(
//!     engine.clone(),
//!     board.clone(),
//!     workspace.clone(),
//!     Arc::new(MockAgentRunner::answering("done", 95)),
//!     Arc::new(config.routing.clone()),
//!     config.polling.clone(),
//! );
//! let orchestrator = Orchestrator::new(engine, executor, board, workspace);
//!
//! let workflow = orchestrator
//!     .create_workflow("specify", "Add user authentication", None)
//!     .await?;
//! orchestrator
//!     .run_current_phase(&workflow.id, &CancelToken::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod audit;
pub mod config;
pub mod error;
pub mod hub;
pub mod model;
pub mod observability;
pub mod polling;
pub mod testing;
pub mod workflow;

pub use config::SpecflowConfig;
pub use error::{ErrorCode, OrchestratorError, OrchestratorResult};
pub use hub::{AgentHub, AskRequest, HubResponse, ResponseStatus};
pub use model::{
    Answer, AuditRecord, AuditStatus, Escalation, EscalationStatus, HumanAction, Message,
    MessageRole, Question, Session, SessionStatus, Trigger, Workflow, WorkflowHistory,
    WorkflowStatus, WorkflowType,
};
pub use polling::{PollRequest, PollResult, SignalPoller, SignalType};
pub use workflow::{Orchestrator, PhaseExecutor, WorkflowEngine, WorkflowStore};
