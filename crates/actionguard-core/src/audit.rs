//! Audit entry points: a repository, a single action, or raw workflow text.

use crate::action_ref::{parse_repository, ActionReference};
use crate::best_practice::pinning::check_pinned_version;
use crate::config::{Config, TrustedPublishers};
use crate::error::AuditError;
use crate::graph::{AuditGraph, EdgeKind, GraphExport, GraphStatistics, NodeKind};
use crate::parser::{extract_actions, parse_workflow, WorkflowDescriptor};
use crate::providers::{AnalysisMethod, ContentProvider};
use crate::resolver::{DependencyResolver, DEFAULT_MAX_DEPTH};
use crate::rules::{check_inconsistent_action_versions, run_workflow_rules, RuleContext};
use crate::security::scanner::SecretScanner;
use serde_json::Map;
use std::collections::HashSet;
use tracing::info;

/// Node id used for the workflow of a raw-text audit.
pub const SUBMITTED_WORKFLOW_ID: &str = "workflow";

/// Finished audit: the annotated graph and its statistics.
#[derive(Debug, Clone)]
pub struct AuditReport {
    pub graph: AuditGraph,
    pub statistics: GraphStatistics,
    pub method: AnalysisMethod,
}

impl AuditReport {
    fn finish(graph: AuditGraph, method: AnalysisMethod) -> Self {
        let statistics = graph.statistics();
        info!(
            nodes = statistics.total_nodes,
            findings = statistics.total_findings,
            "audit finished"
        );
        Self {
            graph,
            statistics,
            method,
        }
    }

    pub fn export(&self) -> GraphExport {
        self.graph.export()
    }
}

/// Runs audits against one content provider.
///
/// Every call builds its own graph and visited set, so a single auditor can
/// serve independent requests.
pub struct Auditor {
    provider: Box<dyn ContentProvider>,
    trusted: TrustedPublishers,
    max_depth: usize,
    scanner: Option<SecretScanner>,
    public: Option<bool>,
}

impl Auditor {
    pub fn new(provider: Box<dyn ContentProvider>) -> Self {
        Self {
            provider,
            trusted: TrustedPublishers::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            scanner: None,
            public: None,
        }
    }

    /// Trusted publishers, depth ceiling and secret scanner from config.
    pub fn from_config(provider: Box<dyn ContentProvider>, config: &Config) -> Self {
        Self {
            provider,
            trusted: config.trusted.clone(),
            max_depth: config.resolver.max_depth,
            scanner: SecretScanner::from_config(&config.secret_scanner),
            public: None,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_trusted(mut self, trusted: TrustedPublishers) -> Self {
        self.trusted = trusted;
        self
    }

    pub fn with_scanner(mut self, scanner: Option<SecretScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    /// Force the repository visibility. Repository audits otherwise use what
    /// the provider reports; the other entry points assume private.
    pub fn with_public(mut self, public: Option<bool>) -> Self {
        self.public = public;
        self
    }

    /// Validate the request and dispatch: a repository wins over an action.
    pub async fn audit_target(
        &self,
        repository: Option<&str>,
        action: Option<&str>,
    ) -> Result<AuditReport, AuditError> {
        let repository = repository.map(str::trim).filter(|r| !r.is_empty());
        let action = action.map(str::trim).filter(|a| !a.is_empty());

        match (repository, action) {
            (Some(repository), _) => {
                let (owner, repo) = parse_repository(repository).ok_or_else(|| {
                    AuditError::InvalidInput(format!(
                        "'{}' is not in owner/repo format",
                        repository
                    ))
                })?;
                self.audit_repository(&owner, &repo).await
            }
            (None, Some(action)) => self.audit_action(action).await,
            (None, None) => Err(AuditError::InvalidInput(
                "either a repository or an action reference is required".into(),
            )),
        }
    }

    pub async fn audit_repository(&self, owner: &str, repo: &str) -> Result<AuditReport, AuditError> {
        let full_name = format!("{}/{}", owner, repo);
        info!(repository = %full_name, method = self.provider.method().as_str(), "auditing repository");

        let repository = self
            .provider
            .get_repository(owner, repo)
            .await?
            .ok_or_else(|| AuditError::RepositoryNotFound(full_name.clone()))?;
        let is_public = self.public.unwrap_or(!repository.private);
        let ctx = RuleContext::new(is_public, self.trusted.clone()).with_repository(&full_name);

        let mut graph = AuditGraph::new();
        let mut metadata = Map::new();
        metadata.insert("private".into(), repository.private.into());
        metadata.insert("default_branch".into(), repository.default_branch.into());
        graph.add_node(&full_name, &full_name, NodeKind::Repository, metadata);

        let files = self.provider.list_workflow_files(owner, repo).await?;
        let mut parsed: Vec<(String, WorkflowDescriptor)> = Vec::new();
        let mut pending: Vec<(String, Vec<String>)> = Vec::new();

        for file in files {
            let id = format!("{}:{}", full_name, file.name);
            let mut metadata = Map::new();
            metadata.insert("path".into(), file.path.clone().into());

            let workflow = match parse_workflow(&file.content) {
                Ok(workflow) => workflow,
                Err(e) => {
                    metadata.insert("parse_error".into(), e.to_string().into());
                    graph.add_node(&id, &file.name, NodeKind::Workflow, metadata);
                    graph.add_edge(&full_name, &id, EdgeKind::Contains);
                    continue;
                }
            };
            if let Some(name) = &workflow.name {
                metadata.insert("name".into(), name.clone().into());
            }
            graph.add_node(&id, &file.name, NodeKind::Workflow, metadata);
            graph.add_edge(&full_name, &id, EdgeKind::Contains);

            let findings = self.workflow_findings(&workflow, &ctx, &file.content, &file.path).await;
            graph.add_issues_to_node(&id, findings);

            pending.push((id, extract_actions(&workflow.raw)));
            parsed.push((file.name, workflow));
        }

        let resolver = DependencyResolver::new(self.provider.as_ref(), &ctx).with_max_depth(self.max_depth);
        let mut visited = HashSet::new();
        for (id, actions) in &pending {
            for action in actions {
                graph.add_edge(id, action, EdgeKind::Uses);
                resolver.resolve(action, &mut graph, &mut visited, 0).await;
            }
        }

        let workflows: Vec<(&str, &WorkflowDescriptor)> =
            parsed.iter().map(|(name, wf)| (name.as_str(), wf)).collect();
        graph.add_issues_to_node(&full_name, check_inconsistent_action_versions(&workflows));

        Ok(AuditReport::finish(graph, self.provider.method()))
    }

    pub async fn audit_action(&self, reference: &str) -> Result<AuditReport, AuditError> {
        let reference = reference.trim();
        let local = reference.starts_with("./") || reference.contains("://");
        let action = ActionReference::parse(reference).filter(|_| !local).ok_or_else(|| {
            AuditError::InvalidInput(format!(
                "'{}' is not an owner/repo[/path][@ref] action reference",
                reference
            ))
        })?;
        if action.points_at_workflow() {
            return Err(AuditError::InvalidInput(format!(
                "'{}' refers to a reusable workflow, not an action",
                reference
            )));
        }
        info!(action = %action, method = self.provider.method().as_str(), "auditing action");

        let ctx = RuleContext::new(self.public.unwrap_or(false), self.trusted.clone());
        let resolver = DependencyResolver::new(self.provider.as_ref(), &ctx).with_max_depth(self.max_depth);
        let mut graph = AuditGraph::new();
        let mut visited = HashSet::new();
        resolver.resolve(reference, &mut graph, &mut visited, 0).await;
        graph.add_issues_to_node(reference, check_pinned_version(reference));

        Ok(AuditReport::finish(graph, self.provider.method()))
    }

    /// Audit a workflow submitted as text. Actions it uses are still resolved
    /// through the provider.
    pub async fn audit_workflow_yaml(&self, content: &str) -> Result<AuditReport, AuditError> {
        self.audit_workflow_file("workflow.yml", content).await
    }

    pub async fn audit_workflow_file(&self, name: &str, content: &str) -> Result<AuditReport, AuditError> {
        let workflow = parse_workflow(content).map_err(|e| AuditError::InvalidInput(e.to_string()))?;
        info!(file = name, "auditing workflow");

        let ctx = RuleContext::new(self.public.unwrap_or(false), self.trusted.clone());
        let mut graph = AuditGraph::new();
        let mut metadata = Map::new();
        metadata.insert("path".into(), name.into());
        if let Some(title) = &workflow.name {
            metadata.insert("name".into(), title.clone().into());
        }
        graph.add_node(SUBMITTED_WORKFLOW_ID, name, NodeKind::Workflow, metadata);

        let findings = self.workflow_findings(&workflow, &ctx, content, name).await;
        graph.add_issues_to_node(SUBMITTED_WORKFLOW_ID, findings);

        let resolver = DependencyResolver::new(self.provider.as_ref(), &ctx).with_max_depth(self.max_depth);
        let mut visited = HashSet::new();
        for action in extract_actions(&workflow.raw) {
            graph.add_edge(SUBMITTED_WORKFLOW_ID, &action, EdgeKind::Uses);
            resolver.resolve(&action, &mut graph, &mut visited, 0).await;
        }

        Ok(AuditReport::finish(graph, AnalysisMethod::Yaml))
    }

    /// Registered workflow rules plus the external scanner, when configured.
    async fn workflow_findings(
        &self,
        workflow: &WorkflowDescriptor,
        ctx: &RuleContext,
        content: &str,
        label: &str,
    ) -> Vec<crate::finding::Finding> {
        let mut findings = run_workflow_rules(workflow, ctx);
        if let Some(scanner) = &self.scanner {
            findings.extend(scanner.scan(content, label).await);
        }
        findings
    }
}
