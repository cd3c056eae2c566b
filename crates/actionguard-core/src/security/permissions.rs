use crate::finding::{Finding, Severity};
use crate::parser::{Permissions, WorkflowDescriptor};
use crate::rules::RuleContext;

fn write_all_finding(scope: &str, permissions: &Permissions) -> Finding {
    Finding::new(
        "github_token_write_all",
        Severity::High,
        format!(
            "{} grants GITHUB_TOKEN write access to every scope ({})",
            scope,
            permissions.describe()
        ),
    )
    .evidence("permissions", permissions.describe())
    .recommend("Grant only the scopes the job needs, e.g. `permissions: { contents: read }`")
}

/// `write-all`, or a mapping where every scope is `write`, at workflow or job
/// level.
pub fn check_write_all_permissions(
    workflow: &WorkflowDescriptor,
    _ctx: &RuleContext,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    if workflow.permissions.is_write_all() {
        findings.push(
            write_all_finding("Workflow", &workflow.permissions).evidence("level", "workflow"),
        );
    }
    for job in &workflow.jobs {
        if job.permissions.is_write_all() {
            findings.push(
                write_all_finding(&format!("Job '{}'", job.id), &job.permissions)
                    .evidence("level", "job")
                    .located(&job.id, None),
            );
        }
    }
    findings
}

/// `id-token: write` lets a job mint cloud credentials; on PR triggers that
/// capability is reachable from contributor code.
pub fn check_oidc_exposure(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    if !workflow.on.is_pull_request_triggered() {
        return Vec::new();
    }
    workflow
        .jobs
        .iter()
        .filter(|job| workflow.effective_permissions(job).grants_write("id-token"))
        .map(|job| {
            Finding::new(
                "oidc_token_exposure",
                Severity::High,
                format!(
                    "Job '{}' can request an OIDC token in a pull-request-triggered workflow",
                    job.id
                ),
            )
            .located(&job.id, None)
            .evidence("triggers", workflow.on.names())
            .recommend("Move id-token: write to a workflow that only runs on trusted events")
        })
        .collect()
}
