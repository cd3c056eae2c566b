pub mod render;

pub use render::{to_dot, to_mermaid};

use crate::finding::{max_severity, Finding, Severity};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Repository,
    Workflow,
    Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    #[default]
    Uses,
    /// Repository to one of its workflow files.
    Contains,
}

/// A repository, workflow file, or action in the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub metadata: Map<String, Value>,
    pub findings: Vec<Finding>,
}

impl GraphNode {
    pub fn finding_count(&self) -> usize {
        self.findings.len()
    }

    /// Highest severity among the node's findings, `None` when clean.
    pub fn severity(&self) -> Option<Severity> {
        max_severity(&self.findings)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type", default)]
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

/// Aggregate numbers over a whole graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub total_findings: usize,
    pub findings_by_severity: SeverityCounts,
    pub nodes_with_findings: usize,
    #[serde(default)]
    pub findings_by_type: BTreeMap<String, usize>,
}

impl GraphStatistics {
    pub fn has_blocking_findings(&self) -> bool {
        self.findings_by_severity.critical + self.findings_by_severity.high > 0
    }
}

/// Node as serialised in a finding-annotated graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExport {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub metadata: Map<String, Value>,
    pub findings: Vec<Finding>,
    pub finding_count: usize,
    /// `critical` / `high` / `medium` / `low`, or `none`.
    pub severity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<NodeExport>,
    pub edges: Vec<GraphEdge>,
}

/// Dependency graph accumulated during one audit.
///
/// Nodes are keyed by id and created at most once. Edges form a set keyed by
/// `(source, target, kind)`. An edge may name a target that does not exist
/// yet; it is linked into the petgraph as soon as both ends are present.
#[derive(Debug, Clone, Default)]
pub struct AuditGraph {
    pub graph: DiGraph<GraphNode, EdgeKind>,
    pub node_map: HashMap<String, NodeIndex>,
    edges: Vec<GraphEdge>,
    edge_set: HashSet<GraphEdge>,
}

impl AuditGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; a no-op returning the existing index if `id` is known.
    pub fn add_node(
        &mut self,
        id: &str,
        label: &str,
        kind: NodeKind,
        metadata: Map<String, Value>,
    ) -> NodeIndex {
        if let Some(&idx) = self.node_map.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(GraphNode {
            id: id.to_string(),
            label: label.to_string(),
            kind,
            metadata,
            findings: Vec::new(),
        });
        self.node_map.insert(id.to_string(), idx);

        // Link edges that were waiting on this node.
        let ready: Vec<(NodeIndex, NodeIndex, EdgeKind)> = self
            .edges
            .iter()
            .filter(|e| e.source == id || e.target == id)
            .filter_map(|e| {
                let source = *self.node_map.get(&e.source)?;
                let target = *self.node_map.get(&e.target)?;
                Some((source, target, e.kind))
            })
            .collect();
        for (source, target, kind) in ready {
            self.graph.add_edge(source, target, kind);
        }
        idx
    }

    /// Add an edge; returns false if the exact triple already exists.
    pub fn add_edge(&mut self, source: &str, target: &str, kind: EdgeKind) -> bool {
        let edge = GraphEdge {
            source: source.to_string(),
            target: target.to_string(),
            kind,
        };
        if !self.edge_set.insert(edge.clone()) {
            return false;
        }
        if let (Some(&s), Some(&t)) = (self.node_map.get(source), self.node_map.get(target)) {
            self.graph.add_edge(s, t, kind);
        }
        self.edges.push(edge);
        true
    }

    /// Append findings to an existing node. Findings for unknown ids are
    /// dropped.
    pub fn add_issues_to_node(&mut self, id: &str, findings: Vec<Finding>) {
        if findings.is_empty() {
            return;
        }
        if let Some(&idx) = self.node_map.get(id) {
            self.graph[idx].findings.extend(findings);
        }
    }

    pub fn clear_findings(&mut self, id: &str) {
        if let Some(&idx) = self.node_map.get(id) {
            self.graph[idx].findings.clear();
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_map.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.node_map.get(id).map(|idx| &self.graph[*idx])
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.node_map.get(id).map(|idx| &mut self.graph[*idx])
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_weights()
    }

    /// Edges in insertion order, including ones with a missing endpoint.
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node_severity(&self, id: &str) -> Option<Severity> {
        self.node(id).and_then(GraphNode::severity)
    }

    pub fn all_findings(&self) -> impl Iterator<Item = (&GraphNode, &Finding)> {
        self.nodes()
            .flat_map(|node| node.findings.iter().map(move |f| (node, f)))
    }

    /// Ids of every node reachable from `id`, excluding `id` itself.
    pub fn transitive_dependencies(&self, id: &str) -> Vec<String> {
        let Some(&start) = self.node_map.get(id) else {
            return Vec::new();
        };
        let mut dfs = Dfs::new(&self.graph, start);
        let mut reached = Vec::new();
        while let Some(idx) = dfs.next(&self.graph) {
            if idx != start {
                reached.push(self.graph[idx].id.clone());
            }
        }
        reached
    }

    pub fn has_cycle(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }

    pub fn statistics(&self) -> GraphStatistics {
        let mut stats = GraphStatistics {
            total_nodes: self.node_count(),
            total_edges: self.edge_count(),
            ..Default::default()
        };
        for node in self.nodes() {
            if !node.findings.is_empty() {
                stats.nodes_with_findings += 1;
            }
            for finding in &node.findings {
                stats.total_findings += 1;
                stats.findings_by_severity.record(finding.severity);
                *stats.findings_by_type.entry(finding.kind.clone()).or_default() += 1;
            }
        }
        stats
    }

    pub fn export(&self) -> GraphExport {
        let nodes = self
            .nodes()
            .map(|node| NodeExport {
                id: node.id.clone(),
                label: node.label.clone(),
                kind: node.kind,
                metadata: node.metadata.clone(),
                findings: node.findings.clone(),
                finding_count: node.finding_count(),
                severity: node
                    .severity()
                    .map(|s| s.as_str())
                    .unwrap_or("none")
                    .to_string(),
            })
            .collect();
        GraphExport {
            nodes,
            edges: self.edges.clone(),
        }
    }
}
