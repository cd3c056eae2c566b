use actionguard_core::finding::{Finding, Severity};
use actionguard_core::graph::{GraphExport, GraphStatistics, NodeExport, NodeKind};
use actionguard_core::store::AnalysisRecord;
use colored::*;

fn severity_tag(severity: Severity) -> String {
    match severity {
        Severity::Critical => format!(" {} ", severity.symbol())
            .on_red()
            .white()
            .bold()
            .to_string(),
        Severity::High => format!(" {} ", severity.symbol())
            .on_yellow()
            .black()
            .bold()
            .to_string(),
        Severity::Medium => format!(" {} ", severity.symbol())
            .on_blue()
            .white()
            .bold()
            .to_string(),
        Severity::Low => format!(" {} ", severity.symbol()).dimmed().to_string(),
    }
}

fn kind_label(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Repository => "repository",
        NodeKind::Workflow => "workflow",
        NodeKind::Action => "action",
    }
}

fn count(value: usize, paint: fn(&str) -> ColoredString) -> String {
    if value > 0 {
        paint(&value.to_string()).bold().to_string()
    } else {
        "0".to_string()
    }
}

/// Print an annotated graph: every node with findings, worst first, then a
/// summary.
pub fn print_audit_report(graph: &GraphExport, stats: &GraphStatistics, title: &str) {
    println!();
    println!(
        "{}",
        format!(" actionguard v{} | Auditing {}", env!("CARGO_PKG_VERSION"), title).bold()
    );
    println!();

    println!(" {}", "Dependency Graph".bold().underline());
    let count_of = |kind: NodeKind| graph.nodes.iter().filter(|n| n.kind == kind).count();
    println!(
        " {} {} workflows, {} actions",
        "|-".dimmed(),
        count_of(NodeKind::Workflow),
        count_of(NodeKind::Action)
    );
    println!(" {} {} edges", "|-".dimmed(), stats.total_edges);
    for node in graph.nodes.iter().filter(|n| n.metadata.contains_key("parse_error")) {
        println!(
            " {} {} could not be parsed: {}",
            "|-".dimmed(),
            node.label.yellow(),
            node.metadata["parse_error"].as_str().unwrap_or_default()
        );
    }
    println!();

    println!(" {}", "=".repeat(60).dimmed());
    println!();

    let mut flagged: Vec<&NodeExport> = graph.nodes.iter().filter(|n| n.finding_count > 0).collect();
    flagged.sort_by_key(|n| std::cmp::Reverse(n.findings.iter().map(|f| f.severity).max()));

    if flagged.is_empty() {
        println!(" {} No issues detected.", "OK".green().bold());
        println!();
    }
    for node in flagged {
        print_node(node);
    }

    println!(" {}", "=".repeat(60).dimmed());
    println!();

    println!(" {}", "Summary".bold().underline());
    let by_severity = &stats.findings_by_severity;
    println!(
        " {} Findings: {} critical, {} high, {} medium, {} low",
        "|-".dimmed(),
        count(by_severity.critical, |s| s.red()),
        count(by_severity.high, |s| s.yellow()),
        by_severity.medium,
        by_severity.low,
    );
    println!(
        " {} Nodes with findings: {}/{}",
        "|-".dimmed(),
        stats.nodes_with_findings,
        stats.total_nodes
    );
    if let Some((kind, n)) = stats.findings_by_type.iter().max_by_key(|(_, n)| **n) {
        println!(" {} Most frequent: {} ({})", "|-".dimmed(), kind.cyan(), n);
    }
    println!();
}

fn print_node(node: &NodeExport) {
    println!(
        " {} {}",
        node.label.bold(),
        format!("({})", kind_label(node.kind)).dimmed()
    );
    let mut findings: Vec<&Finding> = node.findings.iter().collect();
    findings.sort_by_key(|f| std::cmp::Reverse(f.severity));
    for finding in findings {
        print_finding(finding);
    }
    println!();
}

fn print_finding(finding: &Finding) {
    println!("   {} {}", severity_tag(finding.severity), finding.message);

    let location = match (finding.evidence_str("job"), finding.evidence_str("step")) {
        (Some(job), Some(step)) => Some(format!("job '{}', step '{}'", job, step)),
        (Some(job), None) => Some(format!("job '{}'", job)),
        _ => None,
    };
    if let Some(location) = location {
        println!("     {} {}", "|".dimmed(), location);
    }
    println!("     {} {}", "|".dimmed(), finding.kind.cyan());
    if !finding.recommendation.is_empty() {
        println!("     {} {}", "|".dimmed(), finding.recommendation.dimmed());
    }
}

/// Print saved analyses as a table.
pub fn print_history(records: &[AnalysisRecord]) {
    println!();
    if records.is_empty() {
        println!(" No saved analyses.");
        println!();
        return;
    }

    println!(
        " {:<34} {:<20} {:<6} {:>8}  {}",
        "ID".bold(),
        "Saved".bold(),
        "Via".bold(),
        "Findings".bold(),
        "Subject".bold()
    );
    for record in records {
        let stats = &record.statistics;
        let findings = if stats.has_blocking_findings() {
            stats.total_findings.to_string().red().bold().to_string()
        } else {
            stats.total_findings.to_string()
        };
        println!(
            " {:<34} {:<20} {:<6} {:>8}  {}",
            record.id,
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.method.as_str(),
            findings,
            record.subject()
        );
    }
    println!();
}
