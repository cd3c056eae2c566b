use super::{AuditGraph, EdgeKind, GraphNode, NodeKind};
use crate::finding::Severity;
use std::collections::HashMap;

fn severity_color(severity: Option<Severity>) -> &'static str {
    match severity {
        Some(Severity::Critical) => "#dc2626",
        Some(Severity::High) => "#ea580c",
        Some(Severity::Medium) => "#f59e0b",
        Some(Severity::Low) => "#3b82f6",
        None => "#22c55e",
    }
}

fn node_label(node: &GraphNode) -> String {
    let label = node.label.replace('"', "'");
    if node.findings.is_empty() {
        label
    } else {
        format!("{}\\n{} finding(s)", label, node.finding_count())
    }
}

/// Mermaid ids must be plain identifiers, so nodes are numbered.
fn mermaid_ids(graph: &AuditGraph) -> HashMap<&str, String> {
    graph
        .nodes()
        .enumerate()
        .map(|(i, node)| (node.id.as_str(), format!("n{}", i)))
        .collect()
}

/// Generate a Mermaid flowchart of the dependency graph, coloured by severity.
pub fn to_mermaid(graph: &AuditGraph) -> String {
    let ids = mermaid_ids(graph);
    let mut lines = vec!["graph LR".to_string()];

    for node in graph.nodes() {
        let id = &ids[node.id.as_str()];
        let label = node_label(node);
        let shape = match node.kind {
            NodeKind::Repository => format!("{}[(\"{}\")]", id, label),
            NodeKind::Workflow => format!("{}[\"{}\"]", id, label),
            NodeKind::Action => format!("{}([\"{}\"])", id, label),
        };
        lines.push(format!("    {}", shape));
    }

    for edge in graph.edges() {
        let (Some(source), Some(target)) =
            (ids.get(edge.source.as_str()), ids.get(edge.target.as_str()))
        else {
            continue;
        };
        let arrow = match edge.kind {
            EdgeKind::Uses => "-->",
            EdgeKind::Contains => "-.->",
        };
        lines.push(format!("    {} {} {}", source, arrow, target));
    }

    for node in graph.nodes() {
        lines.push(format!(
            "    style {} fill:{},color:#fff",
            ids[node.id.as_str()],
            severity_color(node.severity())
        ));
    }

    lines.join("\n")
}

/// Generate a DOT (Graphviz) representation of the dependency graph.
pub fn to_dot(graph: &AuditGraph) -> String {
    let mut lines = vec![
        "digraph \"actionguard\" {".to_string(),
        "    rankdir=LR;".to_string(),
        "    node [style=\"rounded,filled\", fontname=\"Helvetica\", fontcolor=\"#ffffff\"];"
            .to_string(),
        "    edge [color=\"#666666\"];".to_string(),
        String::new(),
    ];

    for node in graph.nodes() {
        let shape = match node.kind {
            NodeKind::Repository => "folder",
            NodeKind::Workflow => "box",
            NodeKind::Action => "ellipse",
        };
        lines.push(format!(
            "    \"{}\" [label=\"{}\", shape={}, fillcolor=\"{}\"];",
            node.id.replace('"', "'"),
            node_label(node),
            shape,
            severity_color(node.severity())
        ));
    }

    lines.push(String::new());

    for edge in graph.edges() {
        if !graph.contains(&edge.source) || !graph.contains(&edge.target) {
            continue;
        }
        let style = match edge.kind {
            EdgeKind::Uses => "",
            EdgeKind::Contains => " [style=dashed]",
        };
        lines.push(format!(
            "    \"{}\" -> \"{}\"{};",
            edge.source.replace('"', "'"),
            edge.target.replace('"', "'"),
            style
        ));
    }

    lines.push("}".to_string());
    lines.join("\n")
}
