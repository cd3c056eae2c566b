use crate::finding::{Finding, Severity};
use crate::parser::{StepSpec, WorkflowDescriptor};
use crate::rules::RuleContext;

const CHECKOUT: &str = "actions/checkout";

pub(crate) fn checkout_ref(step: &StepSpec) -> Option<&str> {
    step.with
        .get("ref")
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
}

/// `pull_request_target` runs with the base repository's token and secrets.
/// Checking out the PR head (or not pinning the ref at all) under it runs
/// contributor code with those privileges.
pub fn check_dangerous_events(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    if !workflow.on.has("pull_request_target") {
        return Vec::new();
    }

    let mut findings = Vec::new();
    for (job, step) in workflow.steps() {
        if !step.uses_action(CHECKOUT) {
            continue;
        }
        let checkout = checkout_ref(step);
        let dangerous = match checkout {
            None => true,
            Some(r) => r.contains("pull_request.head"),
        };
        if dangerous {
            findings.push(
                Finding::new(
                    "insecure_pull_request_target",
                    Severity::Critical,
                    format!(
                        "Job '{}' checks out pull request code under pull_request_target, which runs it with write access and secrets",
                        job.id
                    ),
                )
                .located(&job.id, Some(&step.label()))
                .maybe_evidence("ref", checkout)
                .recommend(
                    "Use the pull_request trigger for untrusted code, or check out the base ref only",
                ),
            );
        }
    }

    if findings.is_empty() {
        findings.push(
            Finding::new(
                "pull_request_target_usage",
                Severity::High,
                "Workflow uses pull_request_target, which runs with base repository privileges on fork pull requests",
            )
            .recommend("Prefer pull_request; if pull_request_target is required, never execute PR code"),
        );
    }
    findings
}

/// `workflow_run` workflows inherit privileges; checking out the triggering
/// run's head pulls in fork code.
pub fn check_workflow_run_checkout(
    workflow: &WorkflowDescriptor,
    _ctx: &RuleContext,
) -> Vec<Finding> {
    if !workflow.on.has("workflow_run") {
        return Vec::new();
    }
    workflow
        .steps()
        .filter(|(_, step)| step.uses_action(CHECKOUT))
        .filter_map(|(job, step)| {
            let r = checkout_ref(step)?;
            r.contains("workflow_run.head_").then(|| {
                Finding::new(
                    "workflow_run_untrusted_checkout",
                    Severity::High,
                    format!(
                        "Job '{}' checks out the head of the triggering workflow run, which may come from a fork",
                        job.id
                    ),
                )
                .located(&job.id, Some(&step.label()))
                .evidence("ref", r)
                .recommend("Treat artifacts from the triggering run as data; do not check out or execute its code")
            })
        })
        .collect()
}
