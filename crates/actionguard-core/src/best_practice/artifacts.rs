use crate::finding::{Finding, Severity};
use crate::parser::WorkflowDescriptor;
use crate::rules::RuleContext;

const MAX_RETENTION_DAYS: u64 = 90;

const UPLOAD_ACTION: &str = "actions/upload-artifact";

/// Paths that upload the whole workspace or a filesystem root.
const BROAD_PATHS: &[&str] = &[".", "./", "*", "**", "**/*", "/", "~", "${{ github.workspace }}"];

/// Paths that should never end up in an artifact.
const SENSITIVE_FRAGMENTS: &[&str] = &[".git", ".env"];

pub fn check_artifact_retention(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (job, step) in workflow.steps() {
        if !step.uses_action(UPLOAD_ACTION) {
            continue;
        }
        let Some(days) = step
            .with
            .get("retention-days")
            .and_then(|d| d.trim().parse::<u64>().ok())
        else {
            continue;
        };
        if days > MAX_RETENTION_DAYS {
            findings.push(
                Finding::new(
                    "excessive_artifact_retention",
                    Severity::Low,
                    format!("Artifact is retained for {} days", days),
                )
                .located(&job.id, Some(&step.label()))
                .evidence("retention_days", days)
                .recommend(format!(
                    "Keep artifacts for at most {} days",
                    MAX_RETENTION_DAYS
                )),
            );
        }
    }
    findings
}

fn is_broad_path(path: &str) -> bool {
    let path = path.trim();
    BROAD_PATHS.contains(&path)
        || path
            .split('/')
            .any(|segment| SENSITIVE_FRAGMENTS.contains(&segment))
}

pub fn check_artifact_paths(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (job, step) in workflow.steps() {
        if !step.uses_action(UPLOAD_ACTION) {
            continue;
        }
        let Some(paths) = step.with.get("path") else {
            continue;
        };
        let broad: Vec<&str> = paths
            .lines()
            .map(str::trim)
            .filter(|p| !p.is_empty() && !p.starts_with('!'))
            .filter(|p| is_broad_path(p))
            .collect();
        if broad.is_empty() {
            continue;
        }
        findings.push(
            Finding::new(
                "broad_artifact_path",
                Severity::Medium,
                format!(
                    "Artifact upload path '{}' may include credentials or repository internals",
                    broad.join(", ")
                ),
            )
            .located(&job.id, Some(&step.label()))
            .evidence("paths", broad)
            .recommend("Upload only the specific build outputs that are needed"),
        );
    }
    findings
}
