//! Sources of repository content: the GitHub REST API or a local clone.

pub mod git_clone;
pub mod github_api;

pub use git_clone::GitCloneProvider;
pub use github_api::GitHubApiProvider;

use crate::error::ProviderError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Metadata file names, in lookup order.
pub const ACTION_METADATA_FILES: &[&str] = &["action.yml", "action.yaml"];

/// How content was obtained for an audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMethod {
    Api,
    Clone,
    Yaml,
}

impl AnalysisMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMethod::Api => "api",
            AnalysisMethod::Clone => "clone",
            AnalysisMethod::Yaml => "yaml",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub private: bool,
    pub default_branch: String,
}

/// Raw `action.yml` text and the path it was found at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionMetadata {
    pub content: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowFile {
    /// File name, e.g. `ci.yml`.
    pub name: String,
    pub path: String,
    pub content: String,
}

pub(crate) fn is_workflow_file_name(name: &str) -> bool {
    name.ends_with(".yml") || name.ends_with(".yaml")
}

/// Source of action and workflow content.
///
/// Implementations must tell "confirmed absent" apart from "could not
/// determine": absence is `Ok(None)`/`Ok(false)` or
/// [`ProviderError::NotFound`], anything else is an error.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    fn method(&self) -> AnalysisMethod;

    /// `Ok(None)` when the repository does not exist.
    async fn get_repository(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Option<RepositoryInfo>, ProviderError>;

    async fn repository_exists(&self, owner: &str, repo: &str) -> Result<bool, ProviderError> {
        Ok(self.get_repository(owner, repo).await?.is_some())
    }

    /// Contents of `path` at `git_ref`; [`ProviderError::NotFound`] when absent.
    async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        path: &str,
    ) -> Result<String, ProviderError>;

    /// `action.yml`, then `action.yaml`, under `subdir`. `Ok(None)` when neither
    /// exists.
    async fn get_action_metadata(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        subdir: Option<&str>,
    ) -> Result<Option<ActionMetadata>, ProviderError> {
        for file in ACTION_METADATA_FILES {
            let path = match subdir {
                Some(subdir) => format!("{}/{}", subdir.trim_end_matches('/'), file),
                None => file.to_string(),
            };
            match self.get_file_content(owner, repo, git_ref, &path).await {
                Ok(content) => return Ok(Some(ActionMetadata { content, path })),
                Err(e) if e.is_not_found() => {
                    debug!(owner, repo, git_ref, path = %path, "no action metadata at path");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn get_latest_tag(&self, owner: &str, repo: &str)
        -> Result<Option<String>, ProviderError>;

    async fn get_commit_date(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<Option<DateTime<Utc>>, ProviderError>;

    async fn get_latest_tag_commit_date(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        match self.get_latest_tag(owner, repo).await? {
            Some(tag) => self.get_commit_date(owner, repo, &tag).await,
            None => Ok(None),
        }
    }

    /// Workflow files under `.github/workflows` on the default branch.
    async fn list_workflow_files(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<WorkflowFile>, ProviderError>;
}

/// Highest semver-shaped tag, else the first tag listed.
pub(crate) fn pick_latest_tag<S: AsRef<str>>(tags: &[S]) -> Option<String> {
    tags.iter()
        .filter_map(|t| {
            crate::best_practice::versions::parse_version(t.as_ref()).map(|v| (v, t.as_ref()))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, tag)| tag.to_string())
        .or_else(|| tags.first().map(|t| t.as_ref().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_latest_tag_prefers_highest_version() {
        let tags = ["v3.9.0", "v4.1.0", "v4.0.2", "nightly"];
        assert_eq!(pick_latest_tag(&tags).as_deref(), Some("v4.1.0"));
        assert_eq!(pick_latest_tag(&["nightly", "edge"]).as_deref(), Some("nightly"));
        assert_eq!(pick_latest_tag::<&str>(&[]), None);
    }

    #[test]
    fn test_method_names() {
        assert_eq!(AnalysisMethod::Clone.as_str(), "clone");
        assert_eq!(
            serde_json::to_value(AnalysisMethod::Api).unwrap(),
            serde_json::json!("api")
        );
    }
}
