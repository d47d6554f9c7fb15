//! specflow - Main Entry Point
//!
//! CLI front-end over the workflow orchestrator and agent hub. Commands map
//! one-to-one onto the library surface; all state lives under the configured
//! state and audit directories.

use clap::{Parser, Subcommand};
use futures::stream::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use specflow::adapters::{
    CancelToken, CliAgentRunner, GithubBoard, GithubConfig, GitWorkspace, IssueBoard, SystemClock,
};
use specflow::audit::AuditSink;
use specflow::config::SpecflowConfig;
use specflow::hub::{AgentHub, AskRequest};
use specflow::model::{HumanAction, Trigger};
use specflow::observability::init_default_logging;
use specflow::polling::{PollRequest, SignalPoller, SignalType};
use specflow::workflow::{Orchestrator, PhaseExecutor, WorkflowEngine, WorkflowStore};
use specflow::OrchestratorError;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Durable orchestrator for multi-phase AI-assisted development workflows
#[derive(Parser)]
#[command(name = "specflow")]
#[command(about = "Durable orchestrator for multi-phase AI-assisted development workflows")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a workflow and start it
    Create {
        /// Workflow type: specify, plan, tasks, or implement
        #[arg(long = "type")]
        workflow_type: String,
        /// Feature description
        #[arg(long)]
        description: String,
        /// Extra context as a JSON object
        #[arg(long)]
        context: Option<String>,
    },
    /// Show a workflow and its transition history
    Status {
        #[arg(long)]
        id: String,
    },
    /// Apply a trigger to a workflow
    Advance {
        #[arg(long)]
        id: String,
        /// Trigger: agent_complete, human_approved, human_rejected, error
        #[arg(long)]
        trigger: String,
        /// Transition payload as a JSON value
        #[arg(long)]
        payload: Option<String>,
    },
    /// Execute the current phase's remaining steps
    Phase {
        #[arg(long)]
        id: String,
    },
    /// Ask an expert agent a topic-tagged question
    Ask {
        #[arg(long)]
        topic: String,
        #[arg(long)]
        question: String,
        #[arg(long, default_value = "")]
        context: String,
        #[arg(long, default_value = "")]
        feature_id: String,
        #[arg(long)]
        session: Option<String>,
    },
    /// Resolve a pending escalation
    Resolve {
        #[arg(long)]
        escalation: String,
        /// Action: confirm, correct, or add_context
        #[arg(long)]
        action: String,
        #[arg(long)]
        responder: String,
        /// Corrected answer or additional context
        #[arg(long)]
        payload: Option<String>,
    },
    /// Commit and push the feature branch's artifacts
    Push {
        #[arg(long)]
        id: String,
        #[arg(long, default_value = "Update feature artifacts")]
        message: String,
    },
    /// Remove the worktree and branch of a terminal workflow
    Cleanup {
        #[arg(long)]
        id: String,
    },
    /// Poll a ticket for a completion or approval signal
    Poll {
        #[arg(long)]
        ticket: u64,
        /// Signal: agent_complete or human_approval
        #[arg(long)]
        signal: String,
        #[arg(long, default_value_t = 3600)]
        timeout: u64,
        #[arg(long, default_value_t = 30)]
        interval: u64,
    },
    /// Validate configuration
    Config {
        /// Show the resolved configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli.command, config).await {
        error!("{}", e.user_message());
        process::exit(1);
    }
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<SpecflowConfig, OrchestratorError> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(SpecflowConfig::load_from_file(path)?)
        }
        None => {
            for path_str in ["specflow.toml", "config/specflow.toml"] {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(SpecflowConfig::load_from_file(&path)?);
                }
            }
            // Defaults work for local inspection commands
            Ok(toml::from_str("").expect("empty config parses"))
        }
    }
}

async fn run_command(command: Commands, config: SpecflowConfig) -> Result<(), OrchestratorError> {
    match command {
        Commands::Create {
            workflow_type,
            description,
            context,
        } => {
            let context = match context {
                Some(raw) => Some(parse_json_object(&raw)?),
                None => None,
            };
            let orchestrator = build_orchestrator(&config)?;
            let workflow = orchestrator
                .create_workflow(&workflow_type, &description, context)
                .await?;
            print_json(&workflow);
        }
        Commands::Status { id } => {
            let orchestrator = build_orchestrator(&config)?;
            let workflow = orchestrator.get_workflow(&id).await?;
            let history = orchestrator.workflow_history(&id).await?;
            print_json(&serde_json::json!({ "workflow": workflow, "history": history }));
        }
        Commands::Advance { id, trigger, payload } => {
            let trigger = parse_trigger(&trigger)?;
            let payload = match payload {
                Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
                    OrchestratorError::internal(format!("payload is not valid JSON: {e}"))
                })?),
                None => None,
            };
            let orchestrator = build_orchestrator(&config)?;
            let workflow = orchestrator.advance(&id, trigger, payload).await?;
            print_json(&workflow);
        }
        Commands::Phase { id } => {
            let orchestrator = build_orchestrator(&config)?;
            let cancel = CancelToken::new();
            spawn_signal_listener(cancel.clone());
            let workflow = orchestrator.run_current_phase(&id, &cancel).await?;
            print_json(&workflow);
        }
        Commands::Ask {
            topic,
            question,
            context,
            feature_id,
            session,
        } => {
            let hub = build_hub(&config)?;
            let mut request = AskRequest::new(topic, question)
                .with_context(context)
                .with_feature_id(feature_id);
            if let Some(session) = session {
                request = request.with_session(session);
            }
            let response = hub.ask_expert(request).await?;
            print_json(&response);
        }
        Commands::Resolve {
            escalation,
            action,
            responder,
            payload,
        } => {
            let hub = build_hub(&config)?;
            let action = parse_action(&action)?;
            let resolution = hub
                .resolve_escalation(&escalation, action, &responder, payload.as_deref())
                .await?;
            print_json(&serde_json::json!({
                "escalation_id": resolution.escalation_id,
                "action": resolution.action_taken,
                "escalation_resolved": resolution.escalation_resolved,
                "final_answer": resolution.final_answer,
                "needs_reroute": resolution.needs_reroute,
                "updated_question": resolution.updated_question,
            }));
        }
        Commands::Push { id, message } => {
            let orchestrator = build_orchestrator(&config)?;
            orchestrator.push_artifacts(&id, &message).await?;
            println!("artifacts pushed");
        }
        Commands::Cleanup { id } => {
            let orchestrator = build_orchestrator(&config)?;
            orchestrator.cleanup_workspace(&id).await?;
            println!("workspace cleaned up");
        }
        Commands::Poll {
            ticket,
            signal,
            timeout,
            interval,
        } => {
            let board = build_board(&config)?;
            let poller = SignalPoller::new(board);
            let cancel = CancelToken::new();
            spawn_signal_listener(cancel.clone());

            let request = PollRequest::new(ticket, parse_signal(&signal)?)
                .with_timeout(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            let result = poller.poll(&request, &cancel).await?;
            print_json(&result);
        }
        Commands::Config { show } => {
            config.routing.validate()?;
            if show {
                print_json(&config);
            } else {
                println!("configuration OK");
            }
        }
    }
    Ok(())
}

fn build_board(config: &SpecflowConfig) -> Result<Arc<dyn IssueBoard>, OrchestratorError> {
    let github = config.github.as_ref().ok_or_else(|| {
        OrchestratorError::internal("this command needs a [github] section in the configuration")
    })?;
    let board = GithubBoard::new(GithubConfig {
        repository: github.repository.clone(),
        token: github.token()?,
        base_url: github
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.github.com".to_string()),
        ..Default::default()
    })?;
    Ok(Arc::new(board))
}

fn build_orchestrator(config: &SpecflowConfig) -> Result<Orchestrator, OrchestratorError> {
    let store = Arc::new(WorkflowStore::open(&config.orchestrator.state_dir)?);
    let engine = Arc::new(WorkflowEngine::new(store, Arc::new(SystemClock)));
    let board = build_board(config)?;
    let workspace = Arc::new(GitWorkspace::new(
        config.orchestrator.repo_path.clone(),
        config.orchestrator.base_branch.clone(),
    ));
    let runner = Arc::new(CliAgentRunner::new(config.runner.program.clone()));

    let executor = PhaseExecutor::new(
        engine.clone(),
        board.clone(),
        workspace.clone(),
        runner,
        Arc::new(config.routing.clone()),
        config.polling.clone(),
    );
    Ok(Orchestrator::new(engine, executor, board, workspace))
}

fn build_hub(config: &SpecflowConfig) -> Result<AgentHub, OrchestratorError> {
    let audit = Arc::new(AuditSink::new(&config.orchestrator.audit_dir)?);
    let runner = Arc::new(CliAgentRunner::new(config.runner.program.clone()));
    Ok(AgentHub::new(
        Arc::new(config.routing.clone()),
        runner,
        audit,
        Arc::new(SystemClock),
    ))
}

/// Cancel in-flight polls and dispatches on SIGINT/SIGTERM
fn spawn_signal_listener(cancel: CancelToken) {
    match Signals::new([SIGINT, SIGTERM]) {
        Ok(mut signals) => {
            tokio::spawn(async move {
                if signals.next().await.is_some() {
                    info!("shutdown signal received, cancelling");
                    cancel.cancel();
                }
            });
        }
        Err(e) => error!("failed to install signal handler: {e}"),
    }
}

fn parse_trigger(value: &str) -> Result<Trigger, OrchestratorError> {
    match value {
        "start" => Ok(Trigger::Start),
        "agent_complete" => Ok(Trigger::AgentComplete),
        "human_approved" => Ok(Trigger::HumanApproved),
        "human_rejected" => Ok(Trigger::HumanRejected),
        "error" => Ok(Trigger::Error),
        other => Err(OrchestratorError::internal(format!(
            "unknown trigger '{other}'"
        ))),
    }
}

fn parse_action(value: &str) -> Result<HumanAction, OrchestratorError> {
    match value {
        "confirm" => Ok(HumanAction::Confirm),
        "correct" => Ok(HumanAction::Correct),
        "add_context" => Ok(HumanAction::AddContext),
        other => Err(OrchestratorError::internal(format!(
            "unknown action '{other}' (expected confirm, correct, or add_context)"
        ))),
    }
}

fn parse_signal(value: &str) -> Result<SignalType, OrchestratorError> {
    match value.to_lowercase().as_str() {
        "agent_complete" => Ok(SignalType::AgentComplete),
        "human_approval" => Ok(SignalType::HumanApproval),
        other => Err(OrchestratorError::internal(format!(
            "unknown signal '{other}' (expected agent_complete or human_approval)"
        ))),
    }
}

fn parse_json_object(
    raw: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, OrchestratorError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| OrchestratorError::internal(format!("context is not valid JSON: {e}")))?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(OrchestratorError::internal("context must be a JSON object")),
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => error!("failed to render output: {e}"),
    }
}
