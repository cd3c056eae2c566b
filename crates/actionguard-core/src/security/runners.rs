use super::ATTACKER_EXPRESSION_RE;
use crate::finding::{Finding, Severity};
use crate::parser::WorkflowDescriptor;
use crate::rules::RuleContext;

/// Self-hosted runners persist between jobs and sit inside the operator's
/// network. Every self-hosted job gets a baseline finding; exposure findings
/// stack on top of it independently.
pub fn check_self_hosted_runners(workflow: &WorkflowDescriptor, ctx: &RuleContext) -> Vec<Finding> {
    let mut findings = Vec::new();

    for job in workflow.jobs.iter().filter(|j| j.is_self_hosted()) {
        let runner = job.runs_on.join(", ");
        findings.push(
            Finding::new(
                "self_hosted_runner",
                Severity::Medium,
                format!("Job '{}' runs on a self-hosted runner ({})", job.id, runner),
            )
            .located(&job.id, None)
            .evidence("runs_on", job.runs_on.clone())
            .recommend("Use ephemeral, isolated self-hosted runners and restrict which workflows can target them"),
        );

        if ctx.is_public && workflow.on.is_pull_request_triggered() {
            findings.push(
                Finding::new(
                    "self_hosted_runner_pr_exposure",
                    Severity::Critical,
                    format!(
                        "Job '{}' runs pull request code from forks on a self-hosted runner in a public repository",
                        job.id
                    ),
                )
                .located(&job.id, None)
                .evidence("triggers", workflow.on.names())
                .recommend("Never run fork pull requests on self-hosted runners in public repositories"),
            );
        }

        if ctx.is_public && workflow.on.is_issue_triggered() {
            findings.push(
                Finding::new(
                    "self_hosted_runner_issue_exposure",
                    Severity::High,
                    format!(
                        "Job '{}' can be triggered by anyone opening or commenting on an issue and runs on a self-hosted runner",
                        job.id
                    ),
                )
                .located(&job.id, None)
                .evidence("triggers", workflow.on.names())
                .recommend("Move issue-triggered automation to GitHub-hosted runners"),
            );
        }

        if let Some((step, expression)) = job.run_steps().find_map(|(step, run)| {
            ATTACKER_EXPRESSION_RE
                .find(run)
                .map(|m| (step, m.as_str().to_string()))
        }) {
            findings.push(
                Finding::new(
                    "self_hosted_runner_injection",
                    Severity::Critical,
                    format!(
                        "Job '{}' interpolates attacker-influenced input into a shell on a self-hosted runner",
                        job.id
                    ),
                )
                .located(&job.id, Some(&step.label()))
                .evidence("expression", expression)
                .recommend("Pass event data through environment variables and quote it"),
            );
        }

        // Either level counts; a narrower job block does not clear a
        // workflow-wide write-all.
        let write_all = [&job.permissions, &workflow.permissions]
            .into_iter()
            .find(|p| p.is_write_all());
        if let Some(permissions) = write_all {
            findings.push(
                Finding::new(
                    "self_hosted_runner_write_all",
                    Severity::Critical,
                    format!(
                        "Job '{}' has write-all token permissions on a self-hosted runner",
                        job.id
                    ),
                )
                .located(&job.id, None)
                .evidence("permissions", permissions.describe())
                .recommend("Reduce permissions to read-only on self-hosted runners"),
            );
        }
    }

    findings
}
