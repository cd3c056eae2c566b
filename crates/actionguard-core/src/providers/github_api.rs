use super::{
    is_workflow_file_name, pick_latest_tag, AnalysisMethod, ContentProvider, RepositoryInfo,
    WorkflowFile,
};
use crate::config::GitHubConfig;
use crate::error::ProviderError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";
const WORKFLOWS_DIR: &str = ".github/workflows";
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);
const TAGS_PER_PAGE: &str = "100";

/// Content provider backed by the GitHub REST API.
pub struct GitHubApiProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryResponse {
    #[serde(default)]
    private: bool,
    #[serde(default)]
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct TagResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    committer: Option<Signature>,
    author: Option<Signature>,
}

#[derive(Debug, Deserialize)]
struct Signature {
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

impl GitHubApiProvider {
    pub fn new(token: Option<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("actionguard/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));

        if let Some(ref t) = token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", t)).context("Invalid GitHub token")?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: "https://api.github.com".to_string(),
        })
    }

    pub fn from_config(config: &GitHubConfig) -> Result<Self> {
        Ok(Self::new(config.token.clone())?.with_base_url(&config.api_url))
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn repo_url(&self, owner: &str, repo: &str) -> String {
        format!("{}/repos/{}/{}", self.base_url, owner, repo)
    }

    /// GET with retries on connection failures and 5xx responses.
    async fn get(
        &self,
        url: &str,
        accept: Option<&'static str>,
        query: &[(&str, &str)],
    ) -> Result<Response, ProviderError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self.client.get(url);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(accept) = accept {
                request = request.header(ACCEPT, accept);
            }
            match request.send().await {
                Ok(response) if response.status().is_server_error() && attempt < MAX_ATTEMPTS => {
                    debug!(url, status = %response.status(), attempt, "retrying GitHub request");
                }
                Ok(response) => return Ok(response),
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < MAX_ATTEMPTS => {
                    debug!(url, error = %e, attempt, "retrying GitHub request");
                }
                Err(e) => return Err(e.into()),
            }
            tokio::time::sleep(RETRY_BACKOFF * attempt).await;
        }
    }

    async fn get_checked(
        &self,
        url: &str,
        accept: Option<&'static str>,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<Response, ProviderError> {
        let response = self.get(url, accept, query).await?;
        check_status(response, what).await
    }
}

/// Map non-success responses onto provider errors. Only 404 means absent.
async fn check_status(response: Response, what: &str) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound(what.to_string()));
    }

    let remaining = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let reset = response
        .headers()
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();

    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && (remaining.as_deref() == Some("0") || body.to_lowercase().contains("rate limit")));
    if rate_limited {
        return Err(ProviderError::RateLimited(format!(
            "{} (reset at {})",
            what,
            reset.as_deref().unwrap_or("unknown")
        )));
    }

    Err(ProviderError::Unexpected {
        status: status.as_u16(),
        message: body.chars().take(200).collect(),
    })
}

/// Absent resources become `Ok(None)`; every other error propagates.
fn absent_as_none<T>(result: Result<T, ProviderError>) -> Result<Option<T>, ProviderError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ContentProvider for GitHubApiProvider {
    fn method(&self) -> AnalysisMethod {
        AnalysisMethod::Api
    }

    async fn get_repository(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Option<RepositoryInfo>, ProviderError> {
        let what = format!("{}/{}", owner, repo);
        let response = absent_as_none(
            self.get_checked(&self.repo_url(owner, repo), None, &[], &what)
                .await,
        )?;
        let Some(response) = response else {
            return Ok(None);
        };
        let body: RepositoryResponse = response.json().await?;
        Ok(Some(RepositoryInfo {
            private: body.private,
            default_branch: body.default_branch,
        }))
    }

    async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        path: &str,
    ) -> Result<String, ProviderError> {
        let url = format!(
            "{}/contents/{}",
            self.repo_url(owner, repo),
            path.trim_start_matches('/')
        );
        let what = format!("{}/{}/{}@{}", owner, repo, path, git_ref);
        let query: Vec<(&str, &str)> = if git_ref.is_empty() {
            Vec::new()
        } else {
            vec![("ref", git_ref)]
        };
        let response = self
            .get_checked(&url, Some(RAW_MEDIA_TYPE), &query, &what)
            .await?;
        Ok(response.text().await?)
    }

    async fn get_latest_tag(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Option<String>, ProviderError> {
        let url = format!("{}/tags", self.repo_url(owner, repo));
        let what = format!("tags of {}/{}", owner, repo);
        let Some(response) = absent_as_none(
            self.get_checked(&url, None, &[("per_page", TAGS_PER_PAGE)], &what)
                .await,
        )?
        else {
            return Ok(None);
        };
        let tags: Vec<TagResponse> = response.json().await?;
        let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
        Ok(pick_latest_tag(&names))
    }

    async fn get_commit_date(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        let url = format!("{}/commits/{}", self.repo_url(owner, repo), sha);
        let what = format!("commit {} of {}/{}", sha, owner, repo);
        let Some(response) = absent_as_none(self.get_checked(&url, None, &[], &what).await)?
        else {
            return Ok(None);
        };
        let body: CommitResponse = response.json().await?;
        let date = body
            .commit
            .committer
            .and_then(|s| s.date)
            .or_else(|| body.commit.author.and_then(|s| s.date));
        Ok(date)
    }

    async fn list_workflow_files(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<WorkflowFile>, ProviderError> {
        let url = format!("{}/contents/{}", self.repo_url(owner, repo), WORKFLOWS_DIR);
        let what = format!("{}/{}/{}", owner, repo, WORKFLOWS_DIR);
        let Some(response) = absent_as_none(self.get_checked(&url, None, &[], &what).await)?
        else {
            debug!(owner, repo, "repository has no workflows directory");
            return Ok(Vec::new());
        };
        let entries: Vec<ContentEntry> = response.json().await?;

        let mut files = Vec::new();
        for entry in entries
            .into_iter()
            .filter(|e| e.kind == "file" && is_workflow_file_name(&e.name))
        {
            match self.get_file_content(owner, repo, "", &entry.path).await {
                Ok(content) => files.push(WorkflowFile {
                    name: entry.name,
                    path: entry.path,
                    content,
                }),
                Err(e) if e.is_not_found() => {
                    debug!(path = %entry.path, "workflow file disappeared while listing");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(files)
    }
}
