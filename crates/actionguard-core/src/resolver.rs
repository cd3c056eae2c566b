//! Depth-first resolution of an action and everything it transitively uses.

use crate::action_ref::ActionReference;
use crate::best_practice::versions::check_older_version;
use crate::finding::{Finding, Severity};
use crate::graph::{AuditGraph, EdgeKind, NodeKind};
use crate::parser::{extract_action_dependencies, parse_action, ActionDescriptor};
use crate::providers::ContentProvider;
use crate::rules::{check_action, ActionSubject, RuleContext};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

pub const DEFAULT_MAX_DEPTH: usize = 5;

const JS_FALLBACK_ENTRYPOINTS: &[&str] = &["dist/index.js", "index.js"];
const DOCKERFILE_NAMES: &[&str] = &["Dockerfile", "dockerfile"];

type ResolveFuture<'s> = Pin<Box<dyn Future<Output = ()> + Send + 's>>;

/// Walks action dependencies through a [`ContentProvider`], recording nodes,
/// edges and action-level findings in an [`AuditGraph`].
pub struct DependencyResolver<'a> {
    provider: &'a dyn ContentProvider,
    context: &'a RuleContext,
    max_depth: usize,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(provider: &'a dyn ContentProvider, context: &'a RuleContext) -> Self {
        Self {
            provider,
            context,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Resolve `reference` at `depth`. References already in `visited`, or
    /// deeper than the configured ceiling, are skipped.
    pub fn resolve<'s>(
        &'s self,
        reference: &'s str,
        graph: &'s mut AuditGraph,
        visited: &'s mut HashSet<String>,
        depth: usize,
    ) -> ResolveFuture<'s> {
        Box::pin(async move {
            if depth > self.max_depth || visited.contains(reference) {
                return;
            }
            visited.insert(reference.to_string());

            let Some(action) = ActionReference::parse(reference) else {
                debug!(reference, "unresolvable action reference");
                return;
            };
            if action.points_at_workflow() {
                debug!(reference, "reference points at a workflow file, skipping");
                return;
            }

            graph.add_node(reference, &action.to_string(), NodeKind::Action, node_metadata(&action, depth));
            debug!(action = %action, depth, "resolving");

            match self.provider.repository_exists(&action.owner, &action.repo).await {
                Ok(true) => {}
                Ok(false) => {
                    graph.add_issues_to_node(reference, vec![missing_repository(&action)]);
                    return;
                }
                Err(e) if e.is_not_found() => {
                    graph.add_issues_to_node(reference, vec![missing_repository(&action)]);
                    return;
                }
                Err(e) => {
                    warn!(action = %action, error = %e, "could not check repository, skipping branch");
                    return;
                }
            }

            let descriptor = self.fetch_descriptor(&action, reference, graph).await;
            let (script, dockerfile) = match &descriptor {
                Some(descriptor) => (
                    self.fetch_script(&action, descriptor).await,
                    self.fetch_dockerfile(&action, descriptor).await,
                ),
                None => (None, None),
            };

            let subject = ActionSubject {
                reference: &action,
                metadata: descriptor.as_ref(),
                script: script.as_deref(),
                dockerfile: dockerfile.as_deref(),
            };
            let mut findings = check_action(&subject, self.context);
            findings.extend(check_older_version(&action, Some(self.provider)).await);
            graph.add_issues_to_node(reference, findings);

            let Some(descriptor) = descriptor else {
                return;
            };
            for dependency in extract_action_dependencies(&descriptor) {
                graph.add_edge(reference, &dependency, EdgeKind::Uses);
                self.resolve(&dependency, graph, visited, depth + 1).await;
            }
        })
    }

    /// Fetch and parse `action.yml`. Any failure leaves the node without
    /// metadata.
    async fn fetch_descriptor(
        &self,
        action: &ActionReference,
        id: &str,
        graph: &mut AuditGraph,
    ) -> Option<ActionDescriptor> {
        let fetched = self
            .provider
            .get_action_metadata(&action.owner, &action.repo, &action.git_ref, action.subdir.as_deref())
            .await;
        let metadata = match fetched {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                debug!(action = %action, "no action metadata");
                return None;
            }
            Err(e) => {
                debug!(action = %action, error = %e, "action metadata fetch failed");
                return None;
            }
        };

        let node = graph.node_mut(id);
        match parse_action(&metadata.content) {
            Ok(descriptor) => {
                if let Some(node) = node {
                    node.metadata.insert("metadata_path".into(), metadata.path.into());
                    node.metadata
                        .insert("runs_using".into(), descriptor.runs.using.as_str().into());
                }
                Some(descriptor)
            }
            Err(e) => {
                debug!(action = %action, error = %e, "action metadata is not valid YAML");
                if let Some(node) = node {
                    node.metadata.insert("parse_error".into(), e.to_string().into());
                }
                None
            }
        }
    }

    /// First candidate path that can be read, in order.
    async fn first_readable(&self, action: &ActionReference, candidates: &[String]) -> Option<String> {
        for path in candidates {
            match self
                .provider
                .get_file_content(&action.owner, &action.repo, &action.git_ref, path)
                .await
            {
                Ok(content) => return Some(content),
                Err(e) => debug!(action = %action, path = %path, error = %e, "candidate not readable"),
            }
        }
        None
    }

    async fn fetch_script(&self, action: &ActionReference, descriptor: &ActionDescriptor) -> Option<String> {
        if !descriptor.runs.using.is_javascript() {
            return None;
        }
        let main = descriptor.runs.main.as_deref().unwrap_or("index.js");
        let mut candidates = vec![action.path_in_action(main.trim_start_matches("./"))];
        for fallback in JS_FALLBACK_ENTRYPOINTS {
            push_unique(&mut candidates, fallback.to_string());
        }
        self.first_readable(action, &candidates).await
    }

    async fn fetch_dockerfile(
        &self,
        action: &ActionReference,
        descriptor: &ActionDescriptor,
    ) -> Option<String> {
        if !descriptor.is_docker() {
            return None;
        }
        let image = descriptor.dockerfile_path()?;
        let mut candidates = vec![action.path_in_action(image.trim_start_matches("./"))];
        for name in DOCKERFILE_NAMES {
            push_unique(&mut candidates, action.path_in_action(name));
        }
        self.first_readable(action, &candidates).await
    }
}

fn push_unique(candidates: &mut Vec<String>, path: String) {
    if !candidates.contains(&path) {
        candidates.push(path);
    }
}

fn node_metadata(action: &ActionReference, depth: usize) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("owner".into(), action.owner.clone().into());
    metadata.insert("repo".into(), action.repo.clone().into());
    metadata.insert("ref".into(), action.git_ref.clone().into());
    if let Some(subdir) = &action.subdir {
        metadata.insert("subdir".into(), subdir.clone().into());
    }
    metadata.insert("depth".into(), depth.into());
    metadata
}

fn missing_repository(action: &ActionReference) -> Finding {
    Finding::new(
        "missing_action_repository",
        Severity::Critical,
        format!(
            "Repository {} referenced by '{}' does not exist",
            action.repository(),
            action
        ),
    )
    .evidence("repository", action.repository())
    .recommend("Remove the reference; an attacker can register the missing owner or repository and publish code under it")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::providers::{AnalysisMethod, RepositoryInfo, WorkflowFile};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Files keyed by `owner/repo:path`; repositories listed in `missing`
    /// are absent, those in `flaky` fail with a rate limit.
    #[derive(Default)]
    struct FakeProvider {
        files: HashMap<String, String>,
        missing: Vec<String>,
        flaky: Vec<String>,
        reads: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn file(mut self, repository: &str, path: &str, content: &str) -> Self {
            self.files.insert(format!("{}:{}", repository, path), content.to_string());
            self
        }
    }

    #[async_trait]
    impl ContentProvider for FakeProvider {
        fn method(&self) -> AnalysisMethod {
            AnalysisMethod::Api
        }

        async fn get_repository(
            &self,
            owner: &str,
            repo: &str,
        ) -> Result<Option<RepositoryInfo>, ProviderError> {
            let name = format!("{}/{}", owner, repo);
            if self.flaky.contains(&name) {
                return Err(ProviderError::RateLimited(name));
            }
            Ok((!self.missing.contains(&name)).then(|| RepositoryInfo {
                private: false,
                default_branch: "main".into(),
            }))
        }

        async fn get_file_content(
            &self,
            owner: &str,
            repo: &str,
            _git_ref: &str,
            path: &str,
        ) -> Result<String, ProviderError> {
            let key = format!("{}/{}:{}", owner, repo, path);
            self.reads.lock().unwrap().push(key.clone());
            self.files
                .get(&key)
                .cloned()
                .ok_or(ProviderError::NotFound(key))
        }

        async fn get_latest_tag(&self, _: &str, _: &str) -> Result<Option<String>, ProviderError> {
            Ok(None)
        }

        async fn get_commit_date(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<Option<DateTime<Utc>>, ProviderError> {
            Ok(None)
        }

        async fn list_workflow_files(&self, _: &str, _: &str) -> Result<Vec<WorkflowFile>, ProviderError> {
            Ok(Vec::new())
        }
    }

    const COMPOSITE: &str = "runs:\n  using: composite\n  steps:\n    - uses: actions/cache@v4\n    - run: echo hi\n      shell: bash\n";

    #[tokio::test]
    async fn test_composite_dependencies_are_followed() {
        let provider = FakeProvider::default()
            .file("org/setup", "action.yml", COMPOSITE)
            .file("actions/cache", "action.yml", "runs:\n  using: node20\n  main: dist/restore/index.js\n")
            .file("actions/cache", "dist/restore/index.js", "module.exports = {}\n");
        let ctx = RuleContext::default();
        let resolver = DependencyResolver::new(&provider, &ctx);
        let mut graph = AuditGraph::new();
        let mut visited = HashSet::new();

        resolver.resolve("org/setup@v1", &mut graph, &mut visited, 0).await;

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        let cache = graph.node("actions/cache@v4").unwrap();
        assert_eq!(cache.metadata["runs_using"], "node20");
        assert_eq!(cache.metadata["depth"], 1);
        let reads = provider.reads.lock().unwrap();
        assert!(reads.contains(&"actions/cache:dist/restore/index.js".to_string()));
    }

    #[tokio::test]
    async fn test_unversioned_composite_dependency_is_resolved() {
        let composite = "runs:\n  using: composite\n  steps:\n    - uses: org/dep\n    - uses: org/other@main\n";
        let provider = FakeProvider::default().file("org/setup", "action.yml", composite);
        let ctx = RuleContext::default();
        let resolver = DependencyResolver::new(&provider, &ctx);
        let mut graph = AuditGraph::new();
        let mut visited = HashSet::new();

        resolver.resolve("org/setup@v1", &mut graph, &mut visited, 0).await;

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        let dep = graph.node("org/dep").unwrap();
        assert_eq!(dep.label, "org/dep@main");
        assert_eq!(dep.metadata["ref"], "main");
    }

    #[tokio::test]
    async fn test_missing_repository_stops_branch() {
        let provider = FakeProvider {
            missing: vec!["ghost/action".into()],
            ..Default::default()
        };
        let ctx = RuleContext::default();
        let resolver = DependencyResolver::new(&provider, &ctx);
        let mut graph = AuditGraph::new();
        let mut visited = HashSet::new();

        resolver.resolve("ghost/action@v1", &mut graph, &mut visited, 0).await;

        let node = graph.node("ghost/action@v1").unwrap();
        let missing: Vec<_> = node
            .findings
            .iter()
            .filter(|f| f.kind == "missing_action_repository")
            .collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(node.findings.len(), 1);
        assert_eq!(missing[0].severity, Severity::Critical);
        assert!(provider.reads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_error_is_not_missing() {
        let provider = FakeProvider {
            flaky: vec!["org/tool".into()],
            ..Default::default()
        };
        let ctx = RuleContext::default();
        let resolver = DependencyResolver::new(&provider, &ctx);
        let mut graph = AuditGraph::new();
        let mut visited = HashSet::new();

        resolver.resolve("org/tool@v1", &mut graph, &mut visited, 0).await;

        assert!(graph.node("org/tool@v1").unwrap().findings.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let a = "runs:\n  using: composite\n  steps:\n    - uses: org/b@v1\n";
        let b = "runs:\n  using: composite\n  steps:\n    - uses: org/a@v1\n";
        let provider = FakeProvider::default()
            .file("org/a", "action.yml", a)
            .file("org/b", "action.yml", b);
        let ctx = RuleContext::default();
        let resolver = DependencyResolver::new(&provider, &ctx);
        let mut graph = AuditGraph::new();
        let mut visited = HashSet::new();

        resolver.resolve("org/a@v1", &mut graph, &mut visited, 0).await;
        resolver.resolve("org/a@v1", &mut graph, &mut visited, 0).await;

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.has_cycle());
    }

    #[tokio::test]
    async fn test_depth_ceiling() {
        let provider = FakeProvider::default()
            .file("org/a", "action.yml", "runs:\n  using: composite\n  steps:\n    - uses: org/b@v1\n");
        let ctx = RuleContext::default();
        let resolver = DependencyResolver::new(&provider, &ctx).with_max_depth(0);
        let mut graph = AuditGraph::new();
        let mut visited = HashSet::new();

        resolver.resolve("org/a@v1", &mut graph, &mut visited, 0).await;

        assert!(graph.contains("org/a@v1"));
        assert!(!graph.contains("org/b@v1"));
    }

    #[tokio::test]
    async fn test_dockerfile_candidates() {
        let provider = FakeProvider::default()
            .file("org/docker", "action.yml", "runs:\n  using: docker\n  image: build/Dockerfile\n")
            .file("org/docker", "Dockerfile", "FROM alpine:3.19\n");
        let ctx = RuleContext::default();
        let resolver = DependencyResolver::new(&provider, &ctx);
        let mut graph = AuditGraph::new();
        let mut visited = HashSet::new();

        resolver.resolve("org/docker@v1", &mut graph, &mut visited, 0).await;

        let node = graph.node("org/docker@v1").unwrap();
        assert!(node.findings.iter().any(|f| f.kind == "unpinned_base_image"));
    }
}
