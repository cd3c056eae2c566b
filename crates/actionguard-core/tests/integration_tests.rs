use actionguard_core::best_practice::pinning::{check_hash_pinning, check_pinned_version};
use actionguard_core::error::ProviderError;
use actionguard_core::finding::{Finding, Severity};
use actionguard_core::graph::{AuditGraph, EdgeKind, NodeKind};
use actionguard_core::parser::parse_workflow;
use actionguard_core::providers::{AnalysisMethod, ContentProvider, RepositoryInfo, WorkflowFile};
use actionguard_core::resolver::DependencyResolver;
use actionguard_core::rules::{check_inconsistent_action_versions, run_workflow_rules, RuleContext};
use actionguard_core::security::permissions::check_write_all_permissions;
use actionguard_core::security::triggers::check_dangerous_events;
use actionguard_core::{AuditError, Auditor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Map;
use std::collections::{HashMap, HashSet};

/// In-memory provider. Repositories must be registered to exist; those in
/// `flaky` fail with a transient error.
#[derive(Default)]
struct FakeProvider {
    repositories: HashMap<String, bool>,
    flaky: HashSet<String>,
    files: HashMap<String, String>,
    tags: HashMap<String, String>,
    workflows: HashMap<String, Vec<WorkflowFile>>,
}

impl FakeProvider {
    fn repo(mut self, name: &str) -> Self {
        self.repositories.insert(name.to_string(), false);
        self
    }

    fn private_repo(mut self, name: &str) -> Self {
        self.repositories.insert(name.to_string(), true);
        self
    }

    fn flaky(mut self, name: &str) -> Self {
        self.flaky.insert(name.to_string());
        self
    }

    fn file(mut self, repo: &str, path: &str, content: &str) -> Self {
        self.files.insert(format!("{}:{}", repo, path), content.to_string());
        self
    }

    fn tag(mut self, repo: &str, tag: &str) -> Self {
        self.tags.insert(repo.to_string(), tag.to_string());
        self
    }

    fn workflow(mut self, repo: &str, name: &str, content: &str) -> Self {
        self.workflows.entry(repo.to_string()).or_default().push(WorkflowFile {
            name: name.to_string(),
            path: format!(".github/workflows/{}", name),
            content: content.to_string(),
        });
        self
    }
}

#[async_trait]
impl ContentProvider for FakeProvider {
    fn method(&self) -> AnalysisMethod {
        AnalysisMethod::Api
    }

    async fn get_repository(&self, owner: &str, repo: &str) -> Result<Option<RepositoryInfo>, ProviderError> {
        let name = format!("{}/{}", owner, repo);
        if self.flaky.contains(&name) {
            return Err(ProviderError::RateLimited(format!("{} (reset in 60s)", name)));
        }
        Ok(self.repositories.get(&name).map(|&private| RepositoryInfo {
            private,
            default_branch: "main".to_string(),
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
        self.files.get(&key).cloned().ok_or(ProviderError::NotFound(key))
    }

    async fn get_latest_tag(&self, owner: &str, repo: &str) -> Result<Option<String>, ProviderError> {
        Ok(self.tags.get(&format!("{}/{}", owner, repo)).cloned())
    }

    async fn get_commit_date(
        &self,
        _owner: &str,
        _repo: &str,
        _sha: &str,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        Ok(None)
    }

    async fn list_workflow_files(&self, owner: &str, repo: &str) -> Result<Vec<WorkflowFile>, ProviderError> {
        Ok(self
            .workflows
            .get(&format!("{}/{}", owner, repo))
            .cloned()
            .unwrap_or_default())
    }
}

fn kinds(findings: &[Finding]) -> Vec<&str> {
    findings.iter().map(|f| f.kind.as_str()).collect()
}

fn public_context() -> RuleContext {
    RuleContext::new(true, Default::default())
}

// ─── Scenarios ───

#[test]
fn test_unpinned_reference_without_ref() {
    let findings = check_pinned_version("actions/checkout");
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].kind, "unpinned_version");
    assert_eq!(findings[0].severity, Severity::High);
}

#[test]
fn test_short_sha_is_weak_but_pinned() {
    let workflow = parse_workflow(
        "on: push\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps:\n      - uses: actions/checkout@8f4b7f8\n",
    )
    .unwrap();
    let findings = check_hash_pinning(&workflow, &RuleContext::default());
    assert_eq!(kinds(&findings), vec!["short_hash_pinning"]);
    assert_eq!(findings[0].severity, Severity::Low);
    assert!(check_pinned_version("actions/checkout@8f4b7f8").is_empty());
}

#[test]
fn test_pull_request_target_head_checkout() {
    let workflow = parse_workflow(
        r#"
on: pull_request_target
jobs:
  test:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
        with:
          ref: ${{ github.event.pull_request.head.sha }}
      - run: npm test
"#,
    )
    .unwrap();
    let findings = check_dangerous_events(&workflow, &RuleContext::default());
    assert_eq!(kinds(&findings), vec!["insecure_pull_request_target"]);
    assert_eq!(findings[0].severity, Severity::Critical);
}

#[test]
fn test_write_all_permissions() {
    let workflow = parse_workflow(
        "on: push\npermissions: write-all\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps:\n      - run: make\n",
    )
    .unwrap();
    let findings = check_write_all_permissions(&workflow, &RuleContext::default());
    assert!(findings
        .iter()
        .any(|f| f.kind == "github_token_write_all" && f.severity == Severity::High));
}

#[test]
fn test_inconsistent_versions_across_workflows() {
    let ci = parse_workflow(
        "on: push\njobs:\n  a:\n    runs-on: ubuntu-latest\n    steps:\n      - uses: actions/checkout@v3\n",
    )
    .unwrap();
    let release = parse_workflow(
        "on: push\njobs:\n  b:\n    runs-on: ubuntu-latest\n    steps:\n      - uses: actions/checkout@v4\n",
    )
    .unwrap();

    let findings = check_inconsistent_action_versions(&[("ci.yml", &ci), ("release.yml", &release)]);
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].severity, Severity::Low);
    assert_eq!(findings[0].evidence_str("action"), Some("actions/checkout"));
    let usages = findings[0].evidence["usages"].to_string();
    for expected in ["v3", "v4", "ci.yml", "release.yml"] {
        assert!(usages.contains(expected), "missing {expected} in {usages}");
    }
}

#[test]
fn test_self_hosted_runner_on_public_pull_requests() {
    let workflow = parse_workflow(
        "on: pull_request\njobs:\n  test:\n    runs-on: self-hosted\n    steps:\n      - run: make test\n",
    )
    .unwrap();
    let findings = run_workflow_rules(&workflow, &public_context());

    let baseline = findings.iter().find(|f| f.kind == "self_hosted_runner").unwrap();
    let exposure = findings
        .iter()
        .find(|f| f.kind == "self_hosted_runner_pr_exposure")
        .unwrap();
    assert_eq!(baseline.severity, Severity::Medium);
    assert_eq!(exposure.severity, Severity::Critical);
    assert_eq!(baseline.evidence_str("job"), Some("test"));
    assert_eq!(exposure.evidence_str("job"), Some("test"));
}

// ─── Properties ───

#[test]
fn test_pinning_classification_is_total() {
    let refs = [
        "actions/checkout",
        "actions/checkout@",
        "actions/checkout@main",
        "actions/checkout@v4",
        "actions/checkout@v4.1.1",
        "actions/checkout@8f4b7f8",
        "actions/checkout@b4ffde65f46336ab88eb53be808477a3936bae11",
        "weird",
        "",
    ];
    for uses in refs {
        let findings = check_pinned_version(uses);
        assert!(findings.len() <= 1, "{uses} classified more than once");
        assert!(findings.iter().all(|f| f.kind == "unpinned_version"));
    }
}

#[test]
fn test_node_severity_ordering() {
    let mut graph = AuditGraph::new();
    graph.add_node("a/b@v1", "a/b@v1", NodeKind::Action, Map::new());
    graph.add_issues_to_node(
        "a/b@v1",
        vec![
            Finding::new("x", Severity::Low, "low"),
            Finding::new("y", Severity::Medium, "medium"),
        ],
    );
    assert_eq!(graph.node_severity("a/b@v1"), Some(Severity::Medium));

    graph.add_issues_to_node("a/b@v1", vec![Finding::new("z", Severity::Critical, "critical")]);
    assert_eq!(graph.node_severity("a/b@v1"), Some(Severity::Critical));

    graph.clear_findings("a/b@v1");
    assert_eq!(graph.node_severity("a/b@v1"), None);
    assert_eq!(graph.export().nodes[0].severity, "none");
}

#[tokio::test]
async fn test_resolution_is_idempotent() {
    let provider = FakeProvider::default()
        .repo("org/setup")
        .repo("actions/cache")
        .file(
            "org/setup",
            "action.yml",
            "runs:\n  using: composite\n  steps:\n    - uses: actions/cache@v4\n",
        );
    let ctx = RuleContext::default();
    let resolver = DependencyResolver::new(&provider, &ctx);
    let mut graph = AuditGraph::new();
    let mut visited = HashSet::new();

    resolver.resolve("org/setup@v1", &mut graph, &mut visited, 0).await;
    let findings = graph.statistics().total_findings;
    resolver.resolve("org/setup@v1", &mut graph, &mut visited, 0).await;

    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 1);
    assert_eq!(graph.statistics().total_findings, findings);
    assert!(!graph.add_edge("org/setup@v1", "actions/cache@v4", EdgeKind::Uses));
    assert_eq!(graph.edge_count(), 1);
}

#[tokio::test]
async fn test_cyclic_dependencies_terminate() {
    let step = |target: &str| format!("runs:\n  using: composite\n  steps:\n    - uses: {}\n", target);
    let provider = FakeProvider::default()
        .repo("org/a")
        .repo("org/b")
        .repo("org/c")
        .file("org/a", "action.yml", &step("org/b@v1"))
        .file("org/b", "action.yml", &step("org/c@v1"))
        .file("org/c", "action.yml", &step("org/a@v1"));
    let ctx = RuleContext::default();
    let resolver = DependencyResolver::new(&provider, &ctx);
    let mut graph = AuditGraph::new();
    let mut visited = HashSet::new();

    resolver.resolve("org/a@v1", &mut graph, &mut visited, 0).await;

    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.edge_count(), 3);
    assert!(graph.has_cycle());
    assert_eq!(graph.transitive_dependencies("org/a@v1").len(), 2);
}

#[tokio::test]
async fn test_missing_repository_versus_transient_error() {
    let provider = FakeProvider::default().flaky("org/flaky");
    let ctx = RuleContext::default();
    let resolver = DependencyResolver::new(&provider, &ctx);
    let mut graph = AuditGraph::new();
    let mut visited = HashSet::new();

    resolver.resolve("org/gone@v1", &mut graph, &mut visited, 0).await;
    resolver.resolve("org/flaky@v1", &mut graph, &mut visited, 0).await;

    let gone = graph.node("org/gone@v1").unwrap();
    assert_eq!(kinds(&gone.findings), vec!["missing_action_repository"]);
    assert_eq!(gone.findings[0].severity, Severity::Critical);

    let flaky = graph.node("org/flaky@v1").unwrap();
    assert!(flaky.findings.is_empty());
}

// ─── Orchestrated audits ───

const CI: &str = r#"
name: CI
on: pull_request
jobs:
  test:
    runs-on: self-hosted
    steps:
      - uses: actions/checkout@v3
      - uses: org/setup@v1
      - run: make test
"#;

const RELEASE: &str = r#"
on:
  push:
    tags: ["v*"]
jobs:
  publish:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
"#;

fn repository_fixture() -> FakeProvider {
    FakeProvider::default()
        .repo("octo/app")
        .repo("actions/checkout")
        .repo("org/setup")
        .repo("actions/cache")
        .tag("actions/checkout", "v4.2.0")
        .workflow("octo/app", "ci.yml", CI)
        .workflow("octo/app", "release.yml", RELEASE)
        .workflow("octo/app", "broken.yml", "jobs: [unclosed")
        .file(
            "org/setup",
            "action.yml",
            "runs:\n  using: composite\n  steps:\n    - uses: actions/cache@v4\n    - run: curl -sSL https://example.com/install.sh | sh\n      shell: bash\n",
        )
        .file("actions/cache", "action.yml", "runs:\n  using: node20\n  main: dist/restore/index.js\n")
        .file("actions/cache", "dist/restore/index.js", "module.exports = {}\n")
}

#[tokio::test]
async fn test_repository_audit_builds_graph() {
    let auditor = Auditor::new(Box::new(repository_fixture()));
    let report = auditor.audit_repository("octo", "app").await.unwrap();
    let graph = &report.graph;

    let repo = graph.node("octo/app").unwrap();
    assert_eq!(repo.kind, NodeKind::Repository);
    assert!(repo.findings.iter().any(|f| f.kind == "inconsistent_action_versions"));

    let ci = graph.node("octo/app:ci.yml").unwrap();
    assert_eq!(ci.kind, NodeKind::Workflow);
    let ci_kinds = kinds(&ci.findings);
    assert!(ci_kinds.contains(&"self_hosted_runner"));
    assert!(ci_kinds.contains(&"self_hosted_runner_pr_exposure"));

    let broken = graph.node("octo/app:broken.yml").unwrap();
    assert!(broken.metadata.contains_key("parse_error"));
    assert!(broken.findings.is_empty());

    for id in ["actions/checkout@v3", "actions/checkout@v4", "org/setup@v1", "actions/cache@v4"] {
        assert!(graph.contains(id), "missing node {id}");
    }
    assert!(graph
        .edges()
        .iter()
        .any(|e| e.source == "octo/app" && e.target == "octo/app:ci.yml" && e.kind == EdgeKind::Contains));
    assert!(graph
        .edges()
        .iter()
        .any(|e| e.source == "org/setup@v1" && e.target == "actions/cache@v4" && e.kind == EdgeKind::Uses));

    let setup = graph.node("org/setup@v1").unwrap();
    assert!(setup.findings.iter().any(|f| f.kind == "untrusted_action"));
    let outdated = graph.node("actions/checkout@v3").unwrap();
    assert!(outdated.findings.iter().any(|f| f.kind == "outdated_action"));

    assert_eq!(report.method, AnalysisMethod::Api);
    assert_eq!(report.statistics.total_nodes, graph.node_count());
    assert!(report.statistics.has_blocking_findings());
}

#[tokio::test]
async fn test_private_repository_skips_public_exposure() {
    let provider = FakeProvider::default()
        .private_repo("octo/internal")
        .repo("actions/checkout")
        .workflow("octo/internal", "ci.yml", CI);
    let report = Auditor::new(Box::new(provider))
        .audit_repository("octo", "internal")
        .await
        .unwrap();

    let ci = report.graph.node("octo/internal:ci.yml").unwrap();
    let ci_kinds = kinds(&ci.findings);
    assert!(ci_kinds.contains(&"self_hosted_runner"));
    assert!(!ci_kinds.contains(&"self_hosted_runner_pr_exposure"));
}

#[tokio::test]
async fn test_audit_entry_point_validation() {
    let auditor = Auditor::new(Box::new(FakeProvider::default()));

    assert!(matches!(
        auditor.audit_target(None, None).await,
        Err(AuditError::InvalidInput(_))
    ));
    assert!(matches!(
        auditor.audit_target(Some("just-a-name"), None).await,
        Err(AuditError::InvalidInput(_))
    ));
    assert!(matches!(
        auditor.audit_target(Some("octo/missing"), None).await,
        Err(AuditError::RepositoryNotFound(_))
    ));
    assert!(matches!(
        auditor.audit_workflow_yaml("on: [push").await,
        Err(AuditError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_single_action_audit() {
    let auditor = Auditor::new(Box::new(repository_fixture()));
    let report = auditor.audit_target(None, Some("org/setup@v1")).await.unwrap();

    assert_eq!(report.graph.node_count(), 2);
    let setup = report.graph.node("org/setup@v1").unwrap();
    assert!(setup.findings.iter().any(|f| f.kind == "unpinned_composite_dependency"));
    assert!(setup.findings.iter().any(|f| f.kind == "unverified_download"));
}
