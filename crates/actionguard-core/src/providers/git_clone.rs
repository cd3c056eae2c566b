use super::{
    is_workflow_file_name, pick_latest_tag, AnalysisMethod, ContentProvider, RepositoryInfo,
    WorkflowFile,
};
use crate::config::CloneConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

const WORKFLOWS_DIR: &str = ".github/workflows";

/// stderr fragments git prints when a repository or object is absent.
const REPO_MISSING: &[&str] = &["not found", "does not exist"];
const OBJECT_MISSING: &[&str] = &[
    "does not exist",
    "exists on disk, but not in",
    "invalid object name",
    "unknown revision",
    "bad revision",
    "not a valid object name",
];

/// Content provider reading from blobless local clones.
///
/// Each repository is cloned once as a bare, blobless clone; file contents
/// are read with `git show`, so only the blobs actually requested are fetched.
pub struct GitCloneProvider {
    root: PathBuf,
    remote: String,
    /// `None` entries record repositories confirmed absent.
    clones: Mutex<HashMap<String, Option<PathBuf>>>,
    _temp: Option<TempDir>,
}

impl GitCloneProvider {
    pub fn new(config: &CloneConfig) -> Result<Self, ProviderError> {
        let (root, temp) = match &config.dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                (dir.clone(), None)
            }
            None => {
                let temp = TempDir::new()?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };
        Ok(Self {
            root,
            remote: config.remote.trim_end_matches('/').to_string(),
            clones: Mutex::new(HashMap::new()),
            _temp: temp,
        })
    }

    async fn git(&self, dir: Option<&Path>, args: &[&str]) -> Result<Output, ProviderError> {
        let mut command = Command::new("git");
        if let Some(dir) = dir {
            command.arg("-C").arg(dir);
        }
        let output = command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }

    /// Path of the clone, cloning on first use. `Ok(None)` when the remote
    /// repository does not exist.
    async fn ensure_clone(&self, owner: &str, repo: &str) -> Result<Option<PathBuf>, ProviderError> {
        let key = format!("{}/{}", owner, repo).to_lowercase();
        let mut clones = self.clones.lock().await;
        if let Some(entry) = clones.get(&key) {
            return Ok(entry.clone());
        }

        let dir = self.root.join(owner).join(repo);
        if dir.join("HEAD").is_file() {
            debug!(repository = %key, "reusing existing clone");
            clones.insert(key, Some(dir.clone()));
            return Ok(Some(dir));
        }

        let url = format!("{}/{}/{}", self.remote, owner, repo);
        let target = dir.to_string_lossy().into_owned();
        info!(repository = %key, "cloning");
        let output = self
            .git(
                None,
                &["clone", "--quiet", "--bare", "--filter=blob:none", url.as_str(), target.as_str()],
            )
            .await?;

        if output.status.success() {
            clones.insert(key, Some(dir.clone()));
            return Ok(Some(dir));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if mentions(&stderr, REPO_MISSING) {
            debug!(repository = %key, "remote repository does not exist");
            clones.insert(key, None);
            return Ok(None);
        }
        Err(ProviderError::Git(format!(
            "clone of {} failed: {}",
            key,
            stderr.trim()
        )))
    }

    async fn require_clone(&self, owner: &str, repo: &str) -> Result<PathBuf, ProviderError> {
        self.ensure_clone(owner, repo)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{}/{}", owner, repo)))
    }

    /// Run a read-only query in a clone. Missing objects become `Ok(None)`.
    async fn query(&self, dir: &Path, args: &[&str]) -> Result<Option<String>, ProviderError> {
        let output = self.git(Some(dir), args).await?;
        if output.status.success() {
            return Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if mentions(&stderr, OBJECT_MISSING) {
            return Ok(None);
        }
        Err(ProviderError::Git(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        )))
    }

    async fn show(&self, dir: &Path, git_ref: &str, path: &str) -> Result<Option<String>, ProviderError> {
        let git_ref = if git_ref.is_empty() { "HEAD" } else { git_ref };
        let spec = format!("{}:{}", git_ref, path.trim_start_matches('/'));
        self.query(dir, &["show", spec.as_str()]).await
    }
}

fn mentions(stderr: &str, fragments: &[&str]) -> bool {
    let lowered = stderr.to_lowercase();
    fragments.iter().any(|f| lowered.contains(f))
}

#[async_trait]
impl ContentProvider for GitCloneProvider {
    fn method(&self) -> AnalysisMethod {
        AnalysisMethod::Clone
    }

    /// An anonymous clone only succeeds for public repositories.
    async fn get_repository(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Option<RepositoryInfo>, ProviderError> {
        let Some(dir) = self.ensure_clone(owner, repo).await? else {
            return Ok(None);
        };
        let branch = self
            .query(&dir, &["symbolic-ref", "--short", "HEAD"])
            .await?
            .map(|b| b.trim().to_string())
            .unwrap_or_default();
        Ok(Some(RepositoryInfo {
            private: false,
            default_branch: branch,
        }))
    }

    async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        path: &str,
    ) -> Result<String, ProviderError> {
        let dir = self.require_clone(owner, repo).await?;
        self.show(&dir, git_ref, path).await?.ok_or_else(|| {
            ProviderError::NotFound(format!("{}/{}/{}@{}", owner, repo, path, git_ref))
        })
    }

    async fn get_latest_tag(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Option<String>, ProviderError> {
        let Some(dir) = self.ensure_clone(owner, repo).await? else {
            return Ok(None);
        };
        let tags = self
            .query(&dir, &["tag", "--sort=-v:refname"])
            .await?
            .unwrap_or_default();
        let tags: Vec<&str> = tags.lines().map(str::trim).filter(|t| !t.is_empty()).collect();
        Ok(pick_latest_tag(&tags))
    }

    async fn get_commit_date(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        let Some(dir) = self.ensure_clone(owner, repo).await? else {
            return Ok(None);
        };
        let Some(stdout) = self
            .query(&dir, &["show", "-s", "--format=%cI", sha])
            .await?
        else {
            return Ok(None);
        };
        let date = stdout
            .lines()
            .last()
            .and_then(|line| DateTime::parse_from_rfc3339(line.trim()).ok())
            .map(|d| d.with_timezone(&Utc));
        Ok(date)
    }

    async fn list_workflow_files(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<WorkflowFile>, ProviderError> {
        let dir = self.require_clone(owner, repo).await?;
        let prefix = format!("{}/", WORKFLOWS_DIR);
        let listing = self
            .query(&dir, &["ls-tree", "--name-only", "HEAD", prefix.as_str()])
            .await?
            .unwrap_or_default();

        let mut files = Vec::new();
        for path in listing.lines().map(str::trim) {
            let name = path.rsplit('/').next().unwrap_or(path);
            if !is_workflow_file_name(name) {
                continue;
            }
            if let Some(content) = self.show(&dir, "HEAD", path).await? {
                files.push(WorkflowFile {
                    name: name.to_string(),
                    path: path.to_string(),
                    content,
                });
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn git_available() -> bool {
        StdCommand::new("git").arg("--version").output().is_ok()
    }

    fn run(dir: &Path, args: &[&str]) {
        let status = StdCommand::new("git")
            .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
            .args(args)
            .current_dir(dir)
            .env("GIT_COMMITTER_DATE", "2024-01-02 03:04:05 +0000")
            .env("GIT_AUTHOR_DATE", "2024-01-02 03:04:05 +0000")
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    /// `<root>/octo/tool` with an action, a workflow and two tags.
    fn fixture_remote() -> TempDir {
        let remote = TempDir::new().unwrap();
        let repo = remote.path().join("octo").join("tool");
        std::fs::create_dir_all(repo.join(".github/workflows")).unwrap();
        std::fs::write(repo.join("action.yml"), "runs:\n  using: node20\n  main: index.js\n").unwrap();
        std::fs::write(repo.join(".github/workflows/ci.yml"), "on: push\njobs: {}\n").unwrap();
        std::fs::write(repo.join(".github/workflows/notes.txt"), "not a workflow").unwrap();
        run(&repo, &["init", "--quiet", "--initial-branch=main"]);
        run(&repo, &["add", "."]);
        run(&repo, &["commit", "--quiet", "-m", "initial"]);
        run(&repo, &["tag", "v1.0.0"]);
        run(&repo, &["tag", "v1.2.0"]);
        remote
    }

    fn provider(remote: &TempDir, cache: &TempDir) -> GitCloneProvider {
        GitCloneProvider::new(&CloneConfig {
            dir: Some(cache.path().to_path_buf()),
            remote: remote.path().to_string_lossy().into_owned(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_reads_from_clone() {
        if !git_available() {
            return;
        }
        let remote = fixture_remote();
        let cache = TempDir::new().unwrap();
        let provider = provider(&remote, &cache);

        assert!(provider.repository_exists("octo", "tool").await.unwrap());
        let metadata = provider
            .get_action_metadata("octo", "tool", "v1.0.0", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata.path, "action.yml");
        assert!(metadata.content.contains("node20"));

        assert_eq!(
            provider.get_latest_tag("octo", "tool").await.unwrap().as_deref(),
            Some("v1.2.0")
        );
        let date = provider.get_commit_date("octo", "tool", "v1.0.0").await.unwrap().unwrap();
        assert_eq!(date.to_rfc3339(), "2024-01-02T03:04:05+00:00");

        let workflows = provider.list_workflow_files("octo", "tool").await.unwrap();
        assert_eq!(workflows.len(), 1);
        assert_eq!(workflows[0].path, ".github/workflows/ci.yml");

        let missing = provider
            .get_file_content("octo", "tool", "v1.0.0", "dist/index.js")
            .await
            .unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn test_missing_repository_is_absent() {
        if !git_available() {
            return;
        }
        let remote = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let provider = provider(&remote, &cache);
        assert!(!provider.repository_exists("ghost", "action").await.unwrap());
        assert_eq!(provider.get_latest_tag("ghost", "action").await.unwrap(), None);
    }
}
