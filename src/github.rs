//! GitHub remote data client
//!
//! Polls the latest commit, release and tag of a repository. Every request goes
//! through the configured [`RetryPolicy`]; rate-limit headers from successful
//! responses are tracked so callers can see the remaining quota.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use octocrab::Octocrab;
use regex::Regex;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::env;
use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::GitHubConfig;
use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;

/// Remaining-quota threshold below which a warning is logged
pub const RATE_LIMIT_WARNING_THRESHOLD: u32 = 100;

/// Latest commit on the default branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub date: String,
    /// First line of the commit message
    pub message: String,
    pub author: String,
}

impl CommitInfo {
    pub fn short_sha(&self) -> &str {
        self.sha.get(..7).unwrap_or(&self.sha)
    }
}

/// Latest published release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub tag: String,
    pub date: String,
    pub notes: Option<String>,
}

/// Most recent tag. `date` is the poll time: the tags endpoint carries no timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    pub tag: String,
    pub date: String,
}

/// Everything one poll learns about a repository
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoData {
    pub commit: Option<CommitInfo>,
    pub release: Option<ReleaseInfo>,
    pub tag: Option<TagInfo>,
}

/// Remaining API quota as last reported by GitHub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl Default for RateLimitStatus {
    fn default() -> Self {
        Self {
            remaining: 5000,
            reset_at: DateTime::<Utc>::default(),
        }
    }
}

/// Result of a conditional request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conditional<T> {
    /// `None` when the resource is empty or unchanged since `etag`
    pub data: Option<T>,
    pub etag: Option<String>,
}

/// Source of commit/release/tag observations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn latest_commit(&self, owner: &str, name: &str) -> Result<Option<CommitInfo>>;

    /// `Ok(None)` when the repository has no releases
    async fn latest_release(&self, owner: &str, name: &str) -> Result<Option<ReleaseInfo>>;

    /// `Ok(None)` when the repository has no tags
    async fn latest_tag(&self, owner: &str, name: &str) -> Result<Option<TagInfo>>;

    fn rate_limit_status(&self) -> RateLimitStatus;
}

/// Fetch commit, release and tag concurrently
pub async fn fetch_repo_data(source: &dyn RemoteSource, owner: &str, name: &str) -> Result<RepoData> {
    let (commit, release, tag) = tokio::try_join!(
        source.latest_commit(owner, name),
        source.latest_release(owner, name),
        source.latest_tag(owner, name),
    )?;

    Ok(RepoData {
        commit,
        release,
        tag,
    })
}

// Wire formats of the three endpoints

#[derive(Debug, Deserialize)]
struct ApiCommit {
    sha: String,
    commit: ApiCommitDetail,
    author: Option<ApiUser>,
}

#[derive(Debug, Deserialize)]
struct ApiCommitDetail {
    message: Option<String>,
    author: Option<ApiGitAuthor>,
}

#[derive(Debug, Deserialize)]
struct ApiGitAuthor {
    name: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiRelease {
    tag_name: String,
    published_at: Option<String>,
    created_at: Option<String>,
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiTag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl From<ApiCommit> for CommitInfo {
    fn from(api: ApiCommit) -> Self {
        let git_author = api.commit.author;
        let message = api
            .commit
            .message
            .as_deref()
            .and_then(|m| m.lines().next())
            .unwrap_or_default()
            .to_string();
        let author = git_author
            .as_ref()
            .and_then(|a| a.name.clone())
            .or_else(|| api.author.map(|u| u.login))
            .unwrap_or_default();

        Self {
            sha: api.sha,
            date: git_author.and_then(|a| a.date).unwrap_or_default(),
            message,
            author,
        }
    }
}

impl From<ApiRelease> for ReleaseInfo {
    fn from(api: ApiRelease) -> Self {
        Self {
            tag: api.tag_name,
            date: api.published_at.or(api.created_at).unwrap_or_default(),
            notes: api.body,
        }
    }
}

/// HTTP client for the GitHub REST API
#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    api_url: String,
    retry: RetryPolicy,
    rate_limit: Arc<Mutex<RateLimitStatus>>,
}

impl GitHubClient {
    /// Create a client. Without a token requests are unauthenticated (60/hour).
    pub fn new(config: &GitHubConfig, token: Option<&str>, retry: RetryPolicy) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .context("GitHub token contains invalid characters")?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        } else {
            warn!("No GitHub token configured; using unauthenticated requests (60 per hour)");
        }

        let http = Client::builder()
            .user_agent(concat!("reposcout/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .context("Failed to create GitHub HTTP client")?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            retry,
            rate_limit: Arc::new(Mutex::new(RateLimitStatus::default())),
        })
    }

    /// Latest commit, sending `If-None-Match` when an ETag is known
    pub async fn latest_commit_conditional(
        &self,
        owner: &str,
        name: &str,
        etag: Option<&str>,
    ) -> Result<Conditional<CommitInfo>> {
        let path = format!("/repos/{}/{}/commits?per_page=1", owner, name);
        let path = path.as_str();

        self.retry
            .run("latest_commit", SyncError::is_retryable, move || async move {
                let response = self.get(path, etag).await?;
                let etag = response_etag(&response);

                if response.status() == StatusCode::NOT_MODIFIED {
                    debug!(repo = %format!("{}/{}", owner, name), "Commits unchanged since last poll");
                    return Ok(Conditional { data: None, etag });
                }

                let commits: Vec<ApiCommit> = response.json().await?;
                Ok(Conditional {
                    data: commits.into_iter().next().map(CommitInfo::from),
                    etag,
                })
            })
            .await
    }

    async fn fetch_latest_release(&self, owner: &str, name: &str) -> Result<Option<ReleaseInfo>> {
        let path = format!("/repos/{}/{}/releases/latest", owner, name);
        let path = path.as_str();

        self.retry
            .run("latest_release", SyncError::is_retryable, move || async move {
                match self.get(path, None).await {
                    Ok(response) => {
                        let release: ApiRelease = response.json().await?;
                        Ok(Some(ReleaseInfo::from(release)))
                    }
                    Err(err) if err.is_not_found() => Ok(None),
                    Err(err) => Err(err),
                }
            })
            .await
    }

    async fn fetch_latest_tag(&self, owner: &str, name: &str) -> Result<Option<TagInfo>> {
        let path = format!("/repos/{}/{}/tags?per_page=1", owner, name);
        let path = path.as_str();

        self.retry
            .run("latest_tag", SyncError::is_retryable, move || async move {
                match self.get(path, None).await {
                    Ok(response) => {
                        let tags: Vec<ApiTag> = response.json().await?;
                        Ok(tags.into_iter().next().map(|tag| TagInfo {
                            tag: tag.name,
                            date: Utc::now().to_rfc3339(),
                        }))
                    }
                    Err(err) if err.is_not_found() => Ok(None),
                    Err(err) => Err(err),
                }
            })
            .await
    }

    /// Single GET attempt. Non-success statuses become classified errors.
    async fn get(&self, path: &str, etag: Option<&str>) -> Result<Response> {
        let url = format!("{}{}", self.api_url, path);
        let mut request = self.http.get(&url);
        if let Some(etag) = etag {
            request = request.header(header::IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            self.record_rate_limit(response.headers());
            return Ok(response);
        }

        let quota_exhausted = header_value::<u32>(response.headers(), "x-ratelimit-remaining") == Some(0);
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown error").to_string());

        // GitHub reports an exhausted primary quota as 403
        if status == StatusCode::FORBIDDEN && quota_exhausted {
            return Err(SyncError::RemoteTransient {
                status: Some(status.as_u16()),
                message,
            });
        }

        Err(SyncError::from_status(status.as_u16(), message))
    }

    fn record_rate_limit(&self, headers: &HeaderMap) {
        let Some(remaining) = header_value::<u32>(headers, "x-ratelimit-remaining") else {
            return;
        };
        let reset_at = header_value::<i64>(headers, "x-ratelimit-reset")
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or(DateTime::<Utc>::default());

        let status = RateLimitStatus { remaining, reset_at };
        *self.rate_limit.lock().unwrap_or_else(PoisonError::into_inner) = status;

        if remaining < RATE_LIMIT_WARNING_THRESHOLD {
            warn!(remaining, reset_at = %reset_at, "GitHub API rate limit low");
        }
    }
}

#[async_trait]
impl RemoteSource for GitHubClient {
    async fn latest_commit(&self, owner: &str, name: &str) -> Result<Option<CommitInfo>> {
        Ok(self.latest_commit_conditional(owner, name, None).await?.data)
    }

    async fn latest_release(&self, owner: &str, name: &str) -> Result<Option<ReleaseInfo>> {
        self.fetch_latest_release(owner, name).await
    }

    async fn latest_tag(&self, owner: &str, name: &str) -> Result<Option<TagInfo>> {
        self.fetch_latest_tag(owner, name).await
    }

    fn rate_limit_status(&self) -> RateLimitStatus {
        *self.rate_limit.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn header_value<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn response_etag(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Parse `owner/name` or a github.com URL into `(owner, name)`
pub fn parse_repo_reference(input: &str) -> anyhow::Result<(String, String)> {
    let pattern = Regex::new(
        r"^(?:https?://)?(?:www\.)?github\.com/([\w-]+)/([\w.-]+?)/?$|^([\w-]+)/([\w.-]+)$",
    )?;

    let captures = pattern.captures(input.trim()).ok_or_else(|| {
        anyhow!("Invalid GitHub repository reference. Use owner/repo or https://github.com/owner/repo")
    })?;

    let owner = captures
        .get(1)
        .or_else(|| captures.get(3))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| anyhow!("Missing repository owner"))?;
    let name = captures
        .get(2)
        .or_else(|| captures.get(4))
        .map(|m| m.as_str())
        .ok_or_else(|| anyhow!("Missing repository name"))?;
    let name = name.strip_suffix(".git").unwrap_or(name).to_string();

    if name.is_empty() {
        return Err(anyhow!("Missing repository name"));
    }

    Ok((owner, name))
}

// =============================================================================
// Authentication
// =============================================================================

/// GitHub authentication strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Use GitHub CLI authentication
    GitHubCLI,
    /// Use environment variable token
    EnvironmentToken,
    /// Token from the configuration file
    ConfigToken,
    /// No token; public rate limits apply
    Anonymous,
}

/// Find a token according to `github.auth_method`
pub fn resolve_token(config: &GitHubConfig) -> anyhow::Result<(AuthStrategy, Option<String>)> {
    match config.auth_method.as_str() {
        "auto" => {
            if let Ok(token) = try_github_cli() {
                Ok((AuthStrategy::GitHubCLI, Some(token)))
            } else if let Ok(token) = try_environment_token() {
                Ok((AuthStrategy::EnvironmentToken, Some(token)))
            } else if let Some(token) = config.token.clone().filter(|t| !t.is_empty()) {
                Ok((AuthStrategy::ConfigToken, Some(token)))
            } else {
                Ok((AuthStrategy::Anonymous, None))
            }
        }
        "gh_cli" => {
            let token = try_github_cli().context("GitHub CLI authentication failed. Run: gh auth login")?;
            Ok((AuthStrategy::GitHubCLI, Some(token)))
        }
        "token" => {
            if let Ok(token) = try_environment_token() {
                return Ok((AuthStrategy::EnvironmentToken, Some(token)));
            }
            let token = config
                .token
                .clone()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| anyhow!("GITHUB_TOKEN environment variable not found and github.token is not set"))?;
            Ok((AuthStrategy::ConfigToken, Some(token)))
        }
        other => Err(anyhow!("Unknown auth method: {}", other)),
    }
}

/// Try to get token from GitHub CLI
fn try_github_cli() -> anyhow::Result<String> {
    debug!("Attempting GitHub CLI authentication");

    let token_output = Command::new("gh")
        .args(["auth", "token"])
        .output()
        .context("GitHub CLI (gh) is not installed")?;

    if !token_output.status.success() {
        return Err(anyhow!(
            "Failed to retrieve token from GitHub CLI: {}",
            String::from_utf8_lossy(&token_output.stderr)
        ));
    }

    let token = String::from_utf8(token_output.stdout)
        .context("GitHub CLI token is not valid UTF-8")?
        .trim()
        .to_string();

    if token.is_empty() {
        return Err(anyhow!("GitHub CLI returned empty token"));
    }

    debug!("Successfully obtained token from GitHub CLI");
    Ok(token)
}

/// Try to get token from environment variable
fn try_environment_token() -> anyhow::Result<String> {
    debug!("Attempting environment variable authentication");

    let token = env::var("GITHUB_TOKEN").context("GITHUB_TOKEN environment variable not set")?;

    if token.is_empty() {
        return Err(anyhow!("GITHUB_TOKEN is empty"));
    }

    if !["ghp_", "gho_", "ghs_", "github_pat_"]
        .iter()
        .any(|prefix| token.starts_with(prefix))
    {
        warn!("GITHUB_TOKEN doesn't look like a valid GitHub token");
    }

    Ok(token)
}

/// Check a token against the API and return the authenticated login
pub async fn verify_authentication(token: &str) -> anyhow::Result<String> {
    let client = Octocrab::builder()
        .personal_token(token.to_string())
        .build()
        .context("Failed to create GitHub client")?;

    let user = client
        .current()
        .user()
        .await
        .context("Failed to get current user information. Check your authentication.")?;

    info!("Authenticated as GitHub user: {}", user.login);
    Ok(user.login)
}
