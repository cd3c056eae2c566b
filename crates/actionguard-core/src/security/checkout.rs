use super::triggers::checkout_ref;
use crate::finding::{Finding, Severity};
use crate::parser::{JobSpec, StepSpec, WorkflowDescriptor};
use crate::rules::RuleContext;

const CHECKOUT: &str = "actions/checkout";

/// Ref fragments that resolve to contributor-controlled code.
const PR_HEAD_REFS: &[&str] = &["pull_request.head", "head_ref", "refs/pull/"];

fn checkouts(workflow: &WorkflowDescriptor) -> impl Iterator<Item = (&JobSpec, &StepSpec)> {
    workflow
        .steps()
        .filter(|(_, step)| step.uses_action(CHECKOUT))
}

pub fn check_persist_credentials(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    checkouts(workflow)
        .filter(|(_, step)| {
            step.with
                .get("persist-credentials")
                .map_or(true, |v| !v.trim().eq_ignore_ascii_case("false"))
        })
        .map(|(job, step)| {
            Finding::new(
                "checkout_persist_credentials",
                Severity::Low,
                format!(
                    "Checkout in job '{}' leaves the token in .git/config for later steps",
                    job.id
                ),
            )
            .located(&job.id, Some(&step.label()))
            .recommend("Set persist-credentials: false unless later steps push with the token")
        })
        .collect()
}

pub fn check_full_history(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    checkouts(workflow)
        .filter(|(_, step)| step.with.get("fetch-depth").is_some_and(|d| d.trim() == "0"))
        .map(|(job, step)| {
            Finding::new(
                "checkout_full_history",
                Severity::Low,
                format!("Checkout in job '{}' fetches the full git history", job.id),
            )
            .located(&job.id, Some(&step.label()))
            .recommend("Fetch only the depth the job needs; full history widens what a compromised step can read")
        })
        .collect()
}

/// PR head checkouts under `workflow_run` or `issue_comment`. Both triggers
/// run with base repository privileges.
pub fn check_unsafe_ref(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    if !workflow.on.has("workflow_run") && !workflow.on.has("issue_comment") {
        return Vec::new();
    }
    checkouts(workflow)
        .filter_map(|(job, step)| {
            let r = checkout_ref(step)?;
            if r.contains("workflow_run.head_") || !PR_HEAD_REFS.iter().any(|p| r.contains(p)) {
                return None;
            }
            Some(
                Finding::new(
                    "checkout_unsafe_ref",
                    Severity::High,
                    format!(
                        "Job '{}' checks out a pull request head from a privileged trigger",
                        job.id
                    ),
                )
                .located(&job.id, Some(&step.label()))
                .evidence("ref", r)
                .evidence("triggers", workflow.on.names())
                .recommend("Run untrusted pull request code only from the pull_request trigger"),
            )
        })
        .collect()
}

pub fn check_cross_repository(workflow: &WorkflowDescriptor, ctx: &RuleContext) -> Vec<Finding> {
    checkouts(workflow)
        .filter_map(|(job, step)| {
            let repository = step.with.get("repository")?.trim();
            if repository.is_empty() || repository.contains("github.repository") {
                return None;
            }
            if ctx
                .repository
                .as_deref()
                .is_some_and(|current| current.eq_ignore_ascii_case(repository))
            {
                return None;
            }
            let secret_token = step
                .with
                .get("token")
                .or_else(|| step.with.get("ssh-key"))
                .is_some_and(|t| t.contains("secrets."));
            let severity = if secret_token {
                Severity::High
            } else {
                Severity::Medium
            };
            Some(
                Finding::new(
                    "cross_repository_checkout",
                    severity,
                    format!("Job '{}' checks out another repository: {}", job.id, repository),
                )
                .located(&job.id, Some(&step.label()))
                .evidence("repository", repository)
                .evidence("secret_token", secret_token)
                .recommend("Pin the checked-out repository to a commit and use a token scoped to read it only"),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_workflow;

    #[test]
    fn test_persist_credentials_and_depth() {
        let yaml = r#"
on: push
jobs:
  a:
    steps:
      - uses: actions/checkout@v4
        with:
          fetch-depth: 0
      - uses: actions/checkout@v4
        with:
          persist-credentials: false
"#;
        let wf = parse_workflow(yaml).unwrap();
        let ctx = RuleContext::default();
        assert_eq!(check_persist_credentials(&wf, &ctx).len(), 1);
        let depth = check_full_history(&wf, &ctx);
        assert_eq!(depth.len(), 1);
        assert_eq!(depth[0].severity, Severity::Low);
    }

    #[test]
    fn test_issue_comment_head_checkout() {
        let yaml = r#"
on: issue_comment
jobs:
  bench:
    steps:
      - uses: actions/checkout@v4
        with:
          ref: refs/pull/${{ github.event.issue.number }}/head
"#;
        let wf = parse_workflow(yaml).unwrap();
        let findings = check_unsafe_ref(&wf, &RuleContext::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "checkout_unsafe_ref");
    }

    #[test]
    fn test_workflow_run_head_left_to_trigger_rule() {
        let yaml = r#"
on: workflow_run
jobs:
  a:
    steps:
      - uses: actions/checkout@v4
        with:
          ref: ${{ github.event.workflow_run.head_sha }}
"#;
        let wf = parse_workflow(yaml).unwrap();
        assert!(check_unsafe_ref(&wf, &RuleContext::default()).is_empty());
    }

    #[test]
    fn test_cross_repository() {
        let yaml = r#"
on: push
jobs:
  a:
    steps:
      - uses: actions/checkout@v4
        with:
          repository: org/tools
          token: ${{ secrets.TOOLS_PAT }}
      - uses: actions/checkout@v4
        with:
          repository: org/app
      - uses: actions/checkout@v4
        with:
          repository: ${{ github.repository }}
"#;
        let wf = parse_workflow(yaml).unwrap();
        let ctx = RuleContext::default().with_repository("org/app");
        let findings = check_cross_repository(&wf, &ctx);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].evidence_str("repository"), Some("org/tools"));
    }
}
