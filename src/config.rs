//! Configuration for the orchestrator, poller, and topic routing table
//!
//! Loaded once at process boot from TOML and threaded through as an explicit
//! dependency; there is no hidden process-global. Routing configuration is
//! read-only after load.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Sentinel agent id that routes a topic straight to human review
pub const HUMAN_AGENT: &str = "human";

/// Top-level configuration document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecflowConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub polling: PollingSection,
    #[serde(default)]
    pub routing: RoutingSettings,
    /// Present only when a GitHub-backed issue board is wired in
    pub github: Option<GithubSection>,
    #[serde(default)]
    pub runner: RunnerSection,
}

/// Engine directories and repository location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorSection {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_audit_dir")]
    pub audit_dir: PathBuf,
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".specflow/state")
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from(".specflow/audit")
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_base_branch() -> String {
    "main".to_string()
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            audit_dir: default_audit_dir(),
            repo_path: default_repo_path(),
            base_branch: default_base_branch(),
        }
    }
}

/// Signal poller defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollingSection {
    /// Maximum time to wait for a signal (default 1 hour)
    #[serde(default = "default_poll_timeout")]
    pub timeout_seconds: u64,
    /// Time between poll ticks (default 30s)
    #[serde(default = "default_poll_interval")]
    pub interval_seconds: u64,
}

fn default_poll_timeout() -> u64 {
    3600
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            timeout_seconds: default_poll_timeout(),
            interval_seconds: default_poll_interval(),
        }
    }
}

/// GitHub board wiring; the token itself stays in the environment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GithubSection {
    /// Target repository, `owner/repo`
    pub repository: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    pub base_url: Option<String>,
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

impl GithubSection {
    /// Resolve the API token from the configured environment variable
    pub fn token(&self) -> Result<String, ConfigError> {
        std::env::var(&self.token_env).map_err(|_| ConfigError::EnvVarNotFound(self.token_env.clone()))
    }
}

/// Agent CLI runner wiring
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerSection {
    #[serde(default = "default_runner_program")]
    pub program: String,
}

fn default_runner_program() -> String {
    "claude".to_string()
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            program: default_runner_program(),
        }
    }
}

/// Where a resolved confidence threshold came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdSource {
    Default,
    TopicOverride,
}

impl ThresholdSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdSource::Default => "default",
            ThresholdSource::TopicOverride => "topic_override",
        }
    }
}

impl fmt::Display for ThresholdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One expert agent and the topics it owns
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDefinition {
    /// Display name, e.g. `@duc`; defaults to `@<agent-id>`
    pub name: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Topic-specific routing override; takes precedence over agent topic sets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicOverride {
    pub agent: String,
    pub confidence_threshold: Option<u8>,
    pub model: Option<String>,
}

/// Topic routing table: defaults, agents, and per-topic overrides
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingSettings {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: u8,
    #[serde(default = "default_agent_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_model")]
    pub model: String,
    /// Agent definitions keyed by id; resolution scans in declaration order,
    /// so the first configured agent claiming a topic wins
    #[serde(default)]
    pub agents: IndexMap<String, AgentDefinition>,
    #[serde(default)]
    pub overrides: IndexMap<String, TopicOverride>,
}

fn default_confidence_threshold() -> u8 {
    80
}

fn default_agent_timeout() -> u64 {
    120
}

fn default_model() -> String {
    "sonnet".to_string()
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            timeout_seconds: default_agent_timeout(),
            model: default_model(),
            agents: IndexMap::new(),
            overrides: IndexMap::new(),
        }
    }
}

impl RoutingSettings {
    /// Resolve topic → agent id: override first, then the first agent whose
    /// topic set contains it, else the `human` sentinel.
    pub fn agent_for_topic(&self, topic: &str) -> String {
        if let Some(rule) = self.overrides.get(topic) {
            return rule.agent.clone();
        }
        for (agent_id, agent) in &self.agents {
            if agent.topics.iter().any(|t| t == topic) {
                return agent_id.clone();
            }
        }
        HUMAN_AGENT.to_string()
    }

    /// A topic is known when an override names it or some agent claims it
    pub fn is_known_topic(&self, topic: &str) -> bool {
        self.overrides.contains_key(topic)
            || self
                .agents
                .values()
                .any(|agent| agent.topics.iter().any(|t| t == topic))
    }

    /// Sorted, deduplicated set of every recognized topic
    pub fn all_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .agents
            .values()
            .flat_map(|agent| agent.topics.iter().cloned())
            .chain(self.overrides.keys().cloned())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }

    /// Confidence threshold for a topic: override when set, else the default
    pub fn threshold_for_topic(&self, topic: &str) -> (u8, ThresholdSource) {
        if let Some(rule) = self.overrides.get(topic) {
            if let Some(threshold) = rule.confidence_threshold {
                return (threshold, ThresholdSource::TopicOverride);
            }
        }
        (self.confidence_threshold, ThresholdSource::Default)
    }

    /// Model for an exchange: topic override, then agent default, then global
    pub fn model_for(&self, topic: &str, agent_id: &str) -> String {
        if let Some(rule) = self.overrides.get(topic) {
            if let Some(model) = &rule.model {
                return model.clone();
            }
        }
        self.agents
            .get(agent_id)
            .and_then(|agent| agent.model.clone())
            .unwrap_or_else(|| self.model.clone())
    }

    pub fn timeout_for_agent(&self, agent_id: &str) -> u64 {
        self.agents
            .get(agent_id)
            .and_then(|agent| agent.timeout_seconds)
            .unwrap_or(self.timeout_seconds)
    }

    /// Display name for an agent, `@<id>` when none is configured
    pub fn display_name(&self, agent_id: &str) -> String {
        self.agents
            .get(agent_id)
            .and_then(|agent| agent.name.clone())
            .unwrap_or_else(|| format!("@{agent_id}"))
    }

    /// Check table consistency: thresholds within range, override targets known
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.confidence_threshold > 100 {
            return Err(ConfigError::InvalidConfig(format!(
                "default confidence_threshold {} exceeds 100",
                self.confidence_threshold
            )));
        }
        for (topic, rule) in &self.overrides {
            if let Some(threshold) = rule.confidence_threshold {
                if threshold > 100 {
                    return Err(ConfigError::InvalidConfig(format!(
                        "override for '{topic}': confidence_threshold {threshold} exceeds 100"
                    )));
                }
            }
            if rule.agent != HUMAN_AGENT && !self.agents.contains_key(&rule.agent) {
                return Err(ConfigError::InvalidConfig(format!(
                    "override for '{topic}' names unknown agent '{}'",
                    rule.agent
                )));
            }
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SpecflowConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: SpecflowConfig = toml::from_str(&content)?;
        config.routing.validate()?;
        Ok(config)
    }

    /// In-memory routing table for unit tests
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[routing]
confidence_threshold = 80
timeout_seconds = 120
model = "sonnet"

[routing.agents.architect]
name = "@duc"
topics = ["architecture", "authentication", "database"]
model = "opus"

[routing.agents.product]
topics = ["product", "ux"]

[routing.overrides.security]
agent = "architect"
confidence_threshold = 95
"#;
        toml::from_str(toml_content).expect("test config should parse")
    }
}
