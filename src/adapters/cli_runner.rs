//! Agent runner backed by a local agent CLI
//!
//! Dispatches one prompt per invocation through a `claude`-style command line
//! (`--model <model> --print -p <prompt>`) and captures stdout as the agent's
//! output. The child process is killed on timeout or cancellation.

use super::agent_runner::{AgentInvocation, AgentRunOutput, AgentRunner, AgentRunnerError};
use super::CancelToken;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runner that shells out to an agent CLI binary
pub struct CliAgentRunner {
    program: String,
}

impl CliAgentRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for CliAgentRunner {
    fn default() -> Self {
        Self::new("claude")
    }
}

#[async_trait]
impl AgentRunner for CliAgentRunner {
    async fn dispatch(
        &self,
        invocation: AgentInvocation,
        cancel: &CancelToken,
    ) -> Result<AgentRunOutput, AgentRunnerError> {
        let prompt = if invocation.system_prompt.is_empty() {
            invocation.user_prompt.clone()
        } else {
            format!("{}\n\n{}", invocation.system_prompt, invocation.user_prompt)
        };

        debug!(
            agent_id = %invocation.agent_id,
            model = %invocation.model,
            timeout_secs = invocation.timeout.as_secs(),
            "dispatching agent CLI"
        );

        let mut command = Command::new(&self.program);
        command.args(["--model", &invocation.model, "--print"]);
        if !invocation.tools.is_empty() {
            command.args(["--allowed-tools", &invocation.tools.join(",")]);
        }
        command.args(["-p", &prompt]);

        let mut child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentRunnerError::Unavailable {
                message: format!("failed to spawn {}: {e}", self.program),
            })?;

        // Drain pipes concurrently so a chatty agent cannot deadlock on a
        // full pipe buffer while we wait for exit.
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(out) = stdout.as_mut() {
                let _ = out.read_to_string(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(err) = stderr.as_mut() {
                let _ = err.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| AgentRunnerError::Unavailable {
                message: format!("wait failed: {e}"),
            })?,
            _ = tokio::time::sleep(invocation.timeout) => {
                warn!(agent_id = %invocation.agent_id, "agent CLI timed out; killing child");
                let _ = child.start_kill();
                return Err(AgentRunnerError::Timeout {
                    agent_id: invocation.agent_id,
                    timeout_secs: invocation.timeout.as_secs(),
                });
            }
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                return Err(AgentRunnerError::Cancelled);
            }
        };

        let output = stdout_task.await.unwrap_or_default();
        let errors = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(AgentRunnerError::Unavailable {
                message: format!(
                    "agent {} exited with {status}: {}",
                    invocation.agent_id,
                    errors.trim()
                ),
            });
        }

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("model".to_string(), invocation.model);
        Ok(AgentRunOutput { output, metadata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn invocation(timeout: Duration) -> AgentInvocation {
        AgentInvocation {
            agent_id: "architect".to_string(),
            system_prompt: String::new(),
            user_prompt: "hello".to_string(),
            model: "sonnet".to_string(),
            tools: Vec::new(),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let runner = CliAgentRunner::new("specflow-no-such-binary");
        let result = runner
            .dispatch(invocation(Duration::from_secs(5)), &CancelToken::new())
            .await;
        assert!(matches!(result, Err(AgentRunnerError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_cancel_kills_dispatch() {
        // `sleep` stands in for an agent binary that never answers
        let runner = CliAgentRunner::new("sleep");
        let cancel = CancelToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        // The args won't mean anything to `sleep`, so it may exit non-zero
        // first; either way dispatch must return promptly.
        let started = std::time::Instant::now();
        let _ = runner
            .dispatch(invocation(Duration::from_secs(30)), &cancel)
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
