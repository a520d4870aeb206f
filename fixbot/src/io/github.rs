//! GitHub REST implementation of [`Tracker`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::repo_ref::RepoRef;
use crate::core::types::{Issue, IssueState, PullRequest};
use crate::io::config::GithubConfig;
use crate::io::tracker::{Tracker, TrackerFactory};

const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw+json";
const MAX_ERROR_BODY_CHARS: usize = 200;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct GithubIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<GithubLabel>,
    state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    user: Option<GithubUser>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GithubLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GithubContentEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
}

#[derive(Debug, Deserialize)]
struct GithubRepo {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct GithubRef {
    object: GithubRefObject,
}

#[derive(Debug, Deserialize)]
struct GithubRefObject {
    sha: String,
}

#[derive(Debug, Serialize)]
struct CreatePrRequest<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatePrResponse {
    number: u64,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

impl From<GithubIssue> for Issue {
    fn from(raw: GithubIssue) -> Self {
        Issue {
            number: raw.number,
            title: raw.title,
            body: raw.body.unwrap_or_default(),
            labels: raw.labels.into_iter().map(|l| l.name).collect(),
            state: if raw.state == "closed" {
                IssueState::Closed
            } else {
                IssueState::Open
            },
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            author_login: raw.user.map(|u| u.login).unwrap_or_default(),
        }
    }
}

/// Tracker backed by the GitHub REST API.
pub struct GithubTracker {
    http: reqwest::Client,
    api_base: String,
    /// Browser and clone host matching `api_base`.
    web_base: String,
    repo: RepoRef,
    token: Option<String>,
}

impl GithubTracker {
    pub fn new(config: &GithubConfig, token: Option<String>, repo: RepoRef) -> Result<Self> {
        let http = build_client(config, token.as_deref())?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            web_base: web_base(&config.api_base),
            repo,
            token,
        })
    }

    fn repo_endpoint(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.api_base, self.repo.owner, self.repo.name, suffix
        )
    }

    async fn send_json<T: DeserializeOwned>(&self, action: &str, request: RequestBuilder) -> Result<T> {
        let resp = request
            .send()
            .await
            .with_context(|| format!("github {action}: request failed"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(api_error(action, status, &body));
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("github {action}: decode response"))
    }
}

fn build_client(config: &GithubConfig, token: Option<&str>) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static("fixbot"));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/vnd.github+json"),
    );
    headers.insert(
        "x-github-api-version",
        HeaderValue::from_static("2022-11-28"),
    );
    if let Some(token) = token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .context("invalid github authorization header")?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }
    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
        .build()
        .context("failed to create github api client")
}

fn api_error(action: &str, status: StatusCode, body: &str) -> anyhow::Error {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorResponse>(body) {
        let detail = parsed
            .errors
            .first()
            .and_then(|e| e.message.clone())
            .unwrap_or_default();
        if detail.is_empty() {
            return anyhow!("github {action} failed ({status}): {}", parsed.message);
        }
        return anyhow!("github {action} failed ({status}): {}: {detail}", parsed.message);
    }
    let snippet: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    anyhow!("github {action} failed ({status}): {snippet}")
}

/// Render a contents listing as `dir:path` / `file:path` lines.
fn render_listing(entries: &[GithubContentEntry]) -> String {
    entries
        .iter()
        .filter_map(|e| match e.kind.as_str() {
            "dir" => Some(format!("dir:{}", e.path)),
            "file" => Some(format!("file:{}", e.path)),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn contents_suffix(path: &str) -> String {
    let path = path.trim_matches('/');
    if path.is_empty() {
        "/contents".to_string()
    } else {
        format!("/contents/{path}")
    }
}

#[async_trait]
impl Tracker for GithubTracker {
    fn repo(&self) -> &RepoRef {
        &self.repo
    }

    #[instrument(skip_all, fields(repo = %self.repo, limit))]
    async fn list_issues(&self, labels: &[String], limit: usize) -> Result<Vec<Issue>> {
        let per_page = limit.clamp(1, MAX_PAGE_SIZE).to_string();
        let mut query: Vec<(&str, String)> = vec![
            ("state", "open".to_string()),
            ("sort", "created".to_string()),
            ("direction", "desc".to_string()),
            ("per_page", per_page),
        ];
        if !labels.is_empty() {
            query.push(("labels", labels.join(",")));
        }
        let request = self.http.get(self.repo_endpoint("/issues")).query(&query);
        let raw: Vec<GithubIssue> = self.send_json("list issues", request).await?;
        let issues: Vec<Issue> = raw
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .take(limit)
            .map(Issue::from)
            .collect();
        debug!(count = issues.len(), "listed issues");
        Ok(issues)
    }

    #[instrument(skip_all, fields(repo = %self.repo, issue = number))]
    async fn get_issue(&self, number: u64) -> Result<Issue> {
        let request = self.http.get(self.repo_endpoint(&format!("/issues/{number}")));
        let raw: GithubIssue = self.send_json("get issue", request).await?;
        if raw.pull_request.is_some() {
            return Err(anyhow!("#{number} is a pull request, not an issue"));
        }
        Ok(raw.into())
    }

    #[instrument(skip_all, fields(repo = %self.repo, path))]
    async fn get_file_content(&self, path: &str, git_ref: Option<&str>) -> Result<Option<String>> {
        let mut request = self
            .http
            .get(self.repo_endpoint(&contents_suffix(path)))
            .header(ACCEPT, RAW_MEDIA_TYPE);
        if let Some(r) = git_ref {
            request = request.query(&[("ref", r)]);
        }
        let resp = request
            .send()
            .await
            .context("github get file: request failed")?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(api_error("get file", status, &body));
        }
        let text = resp.text().await.context("github get file: read body")?;
        // A directory path answers with a JSON array even for the raw media type.
        if text.trim_start().starts_with('[') {
            return Ok(None);
        }
        Ok(Some(text))
    }

    #[instrument(skip_all, fields(repo = %self.repo, path))]
    async fn get_directory_listing(&self, path: &str, git_ref: Option<&str>) -> Result<String> {
        let mut request = self.http.get(self.repo_endpoint(&contents_suffix(path)));
        if let Some(r) = git_ref {
            request = request.query(&[("ref", r)]);
        }
        let entries: Vec<GithubContentEntry> = self.send_json("list directory", request).await?;
        Ok(render_listing(&entries))
    }

    async fn get_default_branch(&self) -> Result<String> {
        let request = self.http.get(self.repo_endpoint(""));
        let repo: GithubRepo = self.send_json("get repository", request).await?;
        Ok(repo.default_branch)
    }

    #[instrument(skip_all, fields(repo = %self.repo, name, base))]
    async fn create_branch(&self, name: &str, base: &str) -> Result<()> {
        let request = self
            .http
            .get(self.repo_endpoint(&format!("/git/ref/heads/{base}")));
        let base_ref: GithubRef = self.send_json("get base ref", request).await?;
        let resp = self
            .http
            .post(self.repo_endpoint("/git/refs"))
            .json(&serde_json::json!({
                "ref": format!("refs/heads/{name}"),
                "sha": base_ref.object.sha,
            }))
            .send()
            .await
            .context("github create branch: request failed")?;
        let status = resp.status();
        // 422: the ref already exists (a retried approval); the force push moves it.
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            debug!("branch already exists");
            return Ok(());
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(api_error("create branch", status, &body));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(repo = %self.repo, head, base))]
    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest> {
        let request = self.http.post(self.repo_endpoint("/pulls")).json(&CreatePrRequest {
            title,
            body,
            head,
            base,
        });
        let created: CreatePrResponse = self.send_json("create pull request", request).await?;
        Ok(PullRequest {
            number: created.number,
            url: created.html_url,
        })
    }

    #[instrument(skip_all, fields(repo = %self.repo, issue = number))]
    async fn add_issue_comment(&self, number: u64, body: &str) -> Result<()> {
        let request = self
            .http
            .post(self.repo_endpoint(&format!("/issues/{number}/comments")))
            .json(&serde_json::json!({ "body": body }));
        let _: serde_json::Value = self.send_json("add issue comment", request).await?;
        Ok(())
    }

    fn clone_url(&self) -> String {
        let url = format!("{}.git", self.repo_url());
        match (&self.token, url.split_once("://")) {
            (Some(token), Some((scheme, rest))) => {
                format!("{scheme}://x-access-token:{}@{rest}", token.trim())
            }
            _ => url,
        }
    }

    fn repo_url(&self) -> String {
        format!("{}/{}/{}", self.web_base, self.repo.owner, self.repo.name)
    }
}

/// Web host for an API base: `https://api.github.com` serves `https://github.com`,
/// and an Enterprise `https://host/api/v3` serves `https://host`.
fn web_base(api_base: &str) -> String {
    let base = api_base.trim_end_matches('/');
    match base.strip_suffix("/api/v3") {
        Some(host) => host.to_string(),
        None => base.replacen("://api.", "://", 1),
    }
}

/// Factory handing out one [`GithubTracker`] per repository.
pub struct GithubTrackerFactory {
    config: GithubConfig,
    token: Option<String>,
}

impl GithubTrackerFactory {
    pub fn new(config: GithubConfig, token: Option<String>) -> Self {
        Self { config, token }
    }
}

impl TrackerFactory for GithubTrackerFactory {
    fn tracker_for(&self, repo: &RepoRef) -> Result<Arc<dyn Tracker>> {
        let tracker = GithubTracker::new(&self.config, self.token.clone(), repo.clone())?;
        Ok(Arc::new(tracker))
    }
}
