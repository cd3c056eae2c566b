use crate::finding::{Finding, Severity};
use crate::graph::{AuditGraph, GraphNode, NodeKind};
use serde_json::json;
use std::collections::BTreeMap;

fn level(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical | Severity::High => "error",
        Severity::Medium => "warning",
        Severity::Low => "note",
    }
}

/// Generate a SARIF 2.1.0 log covering every finding in the graph.
/// Consumed by GitHub Code Scanning, VS Code, and other tools.
pub fn to_sarif(graph: &AuditGraph) -> serde_json::Value {
    // One rule per finding type, first occurrence supplies the description.
    let mut rules: BTreeMap<&str, &Finding> = BTreeMap::new();
    for (_, finding) in graph.all_findings() {
        let current = rules.entry(finding.kind.as_str()).or_insert(finding);
        if finding.severity > current.severity {
            *current = finding;
        }
    }
    let rules: Vec<serde_json::Value> = rules.into_values().map(sarif_rule).collect();

    let results: Vec<serde_json::Value> = graph
        .all_findings()
        .map(|(node, finding)| sarif_result(node, finding))
        .collect();

    json!({
        "$schema": "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/main/sarif-2.1/schema/sarif-schema-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "actionguard",
                    "version": env!("CARGO_PKG_VERSION"),
                    "rules": rules,
                }
            },
            "results": results,
            "invocations": [{
                "executionSuccessful": true,
                "toolExecutionNotifications": [],
            }]
        }]
    })
}

fn sarif_rule(finding: &Finding) -> serde_json::Value {
    json!({
        "id": finding.kind,
        "name": finding.kind,
        "shortDescription": {
            "text": finding.kind.replace('_', " "),
        },
        "defaultConfiguration": {
            "level": level(finding.severity),
        },
        "properties": {
            "security-severity": security_severity(finding.severity),
        }
    })
}

/// Numeric score GitHub Code Scanning uses to bucket severities.
fn security_severity(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "9.5",
        Severity::High => "7.5",
        Severity::Medium => "5.0",
        Severity::Low => "2.0",
    }
}

fn sarif_result(node: &GraphNode, finding: &Finding) -> serde_json::Value {
    let text = if finding.recommendation.is_empty() {
        finding.message.clone()
    } else {
        format!("{}\n\nRecommendation: {}", finding.message, finding.recommendation)
    };

    let kind = match node.kind {
        NodeKind::Repository => "module",
        NodeKind::Workflow => "resource",
        NodeKind::Action => "package",
    };
    let mut location = json!({
        "logicalLocations": [{
            "name": node.label,
            "fullyQualifiedName": node.id,
            "kind": kind,
        }]
    });

    // Workflow files carry their repository path.
    if let Some(path) = node.metadata.get("path").and_then(|p| p.as_str()) {
        location["physicalLocation"] = json!({
            "artifactLocation": { "uri": path },
            "region": { "startLine": 1 }
        });
    }

    let mut result = json!({
        "ruleId": finding.kind,
        "level": level(finding.severity),
        "message": { "text": text },
        "locations": [location],
    });
    if !finding.evidence.is_empty() {
        result["properties"] = json!({ "evidence": finding.evidence });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_sarif_output_is_valid() {
        let mut graph = AuditGraph::new();
        let mut metadata = Map::new();
        metadata.insert("path".into(), ".github/workflows/ci.yml".into());
        graph.add_node("octo/app:ci.yml", "ci.yml", NodeKind::Workflow, metadata);
        graph.add_node("some/action@main", "some/action@main", NodeKind::Action, Map::new());
        graph.add_issues_to_node(
            "octo/app:ci.yml",
            vec![Finding::new("unpinned_version", Severity::High, "not pinned").recommend("pin it")],
        );
        graph.add_issues_to_node(
            "some/action@main",
            vec![
                Finding::new("unpinned_version", Severity::High, "not pinned"),
                Finding::new("untrusted_action", Severity::Medium, "unknown publisher"),
            ],
        );

        let sarif = to_sarif(&graph);

        assert_eq!(sarif["version"], "2.1.0");
        let runs = sarif["runs"].as_array().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0]["tool"]["driver"]["name"], "actionguard");
        assert_eq!(runs[0]["tool"]["driver"]["rules"].as_array().unwrap().len(), 2);

        let results = runs[0]["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        let workflow = results
            .iter()
            .find(|r| r["locations"][0]["logicalLocations"][0]["fullyQualifiedName"] == "octo/app:ci.yml")
            .unwrap();
        assert_eq!(workflow["level"], "error");
        assert_eq!(
            workflow["locations"][0]["physicalLocation"]["artifactLocation"]["uri"],
            ".github/workflows/ci.yml"
        );
        assert!(workflow["message"]["text"].as_str().unwrap().contains("Recommendation: pin it"));
    }

    #[test]
    fn test_empty_graph() {
        let sarif = to_sarif(&AuditGraph::new());
        assert!(sarif["runs"][0]["results"].as_array().unwrap().is_empty());
    }
}
