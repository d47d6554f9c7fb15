//! GitHub-backed issue board
//!
//! Thin wrapper over the GitHub REST API with fixed retry (3 attempts, 1s
//! delay on 5xx and network errors) and rate-limit detection. HTTP 429 maps
//! to [`IssueBoardError::RateLimited`]; the wait hint is the
//! `X-RateLimit-Reset` header with a one-hour floor, so retry loops back off
//! hard instead of hammering the API.

use super::issue_board::{Issue, IssueBoard, IssueBoardError, IssueComment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);
/// Minimum rate-limit wait: at least 1 hour, whatever the reset header says
const RATE_LIMIT_FLOOR_SECS: i64 = 3600;

/// GitHub board configuration
#[derive(Debug, Clone)]
pub struct GithubConfig {
    /// Target repository, `owner/repo`
    pub repository: String,
    pub token: String,
    pub base_url: String,
    pub timeout: Duration,
    pub api_version: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            repository: String::new(),
            token: String::new(),
            base_url: "https://api.github.com".to_string(),
            timeout: Duration::from_secs(30),
            api_version: "2022-11-28".to_string(),
        }
    }
}

/// GitHub REST implementation of [`IssueBoard`]
pub struct GithubBoard {
    config: GithubConfig,
    client: Client,
    owner: String,
    repo: String,
}

impl GithubBoard {
    pub fn new(config: GithubConfig) -> Result<Self, IssueBoardError> {
        if config.token.is_empty() {
            return Err(IssueBoardError::NotConfigured {
                message: "GitHub token is required".to_string(),
            });
        }
        Url::parse(&config.base_url).map_err(|e| IssueBoardError::NotConfigured {
            message: format!("invalid base URL '{}': {e}", config.base_url),
        })?;
        let (owner, repo) = config.repository.split_once('/').ok_or_else(|| {
            IssueBoardError::NotConfigured {
                message: format!(
                    "repository '{}' must be in owner/repo form",
                    config.repository
                ),
            }
        })?;
        let (owner, repo) = (owner.to_string(), repo.to_string());

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("specflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IssueBoardError::Network {
                message: e.to_string(),
            })?;

        Ok(Self {
            config,
            client,
            owner,
            repo,
        })
    }

    fn issues_url(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}/issues{suffix}",
            self.config.base_url, self.owner, self.repo
        )
    }

    fn check_rate_limit(response: &Response) -> Result<(), IssueBoardError> {
        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(());
        }
        let reset = response
            .headers()
            .get("X-RateLimit-Reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let wait_seconds = (reset - Utc::now().timestamp()).max(RATE_LIMIT_FLOOR_SECS) as u64;
        warn!(wait_seconds, "GitHub rate limit exceeded");
        Err(IssueBoardError::RateLimited { wait_seconds })
    }

    /// One request with fixed retry on 5xx and network failures. Rate limits
    /// and 404s are never retried.
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
        query: Option<&[(&str, String)]>,
    ) -> Result<Response, IssueBoardError> {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            debug!(%method, url, attempt, "GitHub API request");
            let mut request = self
                .client
                .request(method.clone(), url)
                .header("Accept", "application/vnd.github+json")
                .header("Authorization", format!("Bearer {}", self.config.token))
                .header("X-GitHub-Api-Version", &self.config.api_version);
            if let Some(body) = &body {
                request = request.json(body);
            }
            if let Some(query) = query {
                request = request.query(query);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(url, attempt, error = %e, "GitHub network error");
                    last_error = Some(IssueBoardError::Network {
                        message: e.to_string(),
                    });
                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                    continue;
                }
            };

            Self::check_rate_limit(&response)?;
            let status = response.status();

            if status == StatusCode::NOT_FOUND {
                return Err(IssueBoardError::NotFound {
                    resource: format!("GitHub resource {url}"),
                });
            }
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(IssueBoardError::Auth {
                    message: format!("GitHub returned {status}"),
                });
            }
            if status.is_server_error() {
                warn!(url, attempt, %status, "GitHub server error");
                last_error = Some(IssueBoardError::Server {
                    status: status.as_u16(),
                    message: response.text().await.unwrap_or_default(),
                });
                if attempt < MAX_RETRIES {
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                continue;
            }
            if !status.is_success() {
                return Err(IssueBoardError::Server {
                    status: status.as_u16(),
                    message: response.text().await.unwrap_or_default(),
                });
            }

            return Ok(response);
        }

        Err(last_error.unwrap_or(IssueBoardError::Server {
            status: 500,
            message: "request failed after retries".to_string(),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<GhLabel>,
}

impl From<GhIssue> for Issue {
    fn from(issue: GhIssue) -> Self {
        Issue {
            number: issue.number,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhComment {
    id: u64,
    #[serde(default)]
    body: String,
    user: GhUser,
    created_at: DateTime<Utc>,
}

#[async_trait]
impl IssueBoard for GithubBoard {
    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<Issue, IssueBoardError> {
        let response = self
            .request(
                Method::POST,
                &self.issues_url(""),
                Some(json!({ "title": title, "body": body, "labels": labels })),
                None,
            )
            .await?;
        let issue: GhIssue = response.json().await.map_err(|e| IssueBoardError::Server {
            status: 200,
            message: format!("malformed issue payload: {e}"),
        })?;
        Ok(issue.into())
    }

    async fn get_issue(&self, number: u64) -> Result<Issue, IssueBoardError> {
        let response = self
            .request(Method::GET, &self.issues_url(&format!("/{number}")), None, None)
            .await?;
        let issue: GhIssue = response.json().await.map_err(|e| IssueBoardError::Server {
            status: 200,
            message: format!("malformed issue payload: {e}"),
        })?;
        Ok(issue.into())
    }

    async fn list_comments_since(
        &self,
        number: u64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<IssueComment>, IssueBoardError> {
        let mut query: Vec<(&str, String)> = vec![("per_page", "100".to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_rfc3339()));
        }
        let response = self
            .request(
                Method::GET,
                &self.issues_url(&format!("/{number}/comments")),
                None,
                Some(query.as_slice()),
            )
            .await?;
        let comments: Vec<GhComment> =
            response.json().await.map_err(|e| IssueBoardError::Server {
                status: 200,
                message: format!("malformed comments payload: {e}"),
            })?;

        let mut comments: Vec<IssueComment> = comments
            .into_iter()
            // The API `since` filter is >=; keep the contract strict
            .filter(|c| since.map_or(true, |s| c.created_at > s))
            .map(|c| IssueComment {
                id: c.id,
                author: c.user.login,
                body: c.body,
                created_at: c.created_at,
            })
            .collect();
        comments.sort_by_key(|c| (c.created_at, c.id));
        Ok(comments)
    }

    async fn add_comment(&self, number: u64, body: &str) -> Result<u64, IssueBoardError> {
        #[derive(Deserialize)]
        struct Created {
            id: u64,
        }
        let response = self
            .request(
                Method::POST,
                &self.issues_url(&format!("/{number}/comments")),
                Some(json!({ "body": body })),
                None,
            )
            .await?;
        let created: Created = response.json().await.map_err(|e| IssueBoardError::Server {
            status: 200,
            message: format!("malformed comment payload: {e}"),
        })?;
        Ok(created.id)
    }

    async fn add_labels(&self, number: u64, labels: &[String]) -> Result<(), IssueBoardError> {
        self.request(
            Method::POST,
            &self.issues_url(&format!("/{number}/labels")),
            Some(json!({ "labels": labels })),
            None,
        )
        .await?;
        Ok(())
    }

    async fn remove_labels(&self, number: u64, labels: &[String]) -> Result<(), IssueBoardError> {
        for label in labels {
            let result = self
                .request(
                    Method::DELETE,
                    &self.issues_url(&format!("/{number}/labels/{label}")),
                    None,
                    None,
                )
                .await;
            match result {
                Ok(_) => {}
                // Removing an absent label is a no-op
                Err(IssueBoardError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> GithubConfig {
        GithubConfig {
            repository: "acme/widgets".to_string(),
            token: "test-token".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_requires_token() {
        let config = GithubConfig {
            repository: "acme/widgets".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            GithubBoard::new(config),
            Err(IssueBoardError::NotConfigured { .. })
        ));
    }

    #[test]
    fn test_new_requires_owner_repo_form() {
        let config = GithubConfig {
            repository: "widgets".to_string(),
            token: "t".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            GithubBoard::new(config),
            Err(IssueBoardError::NotConfigured { .. })
        ));
    }

    #[test]
    fn test_issues_url_shape() {
        let board = GithubBoard::new(test_config()).unwrap();
        assert_eq!(
            board.issues_url("/42/comments"),
            "https://api.github.com/repos/acme/widgets/issues/42/comments"
        );
    }
}
