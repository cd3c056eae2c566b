use crate::finding::{Finding, Severity};
use crate::parser::{JobSpec, StepSpec, WorkflowDescriptor};
use crate::rules::RuleContext;

/// Step names or actions that indicate a security scan.
const SECURITY_STEP_MARKERS: &[&str] = &[
    "codeql",
    "snyk",
    "trivy",
    "grype",
    "semgrep",
    "gitleaks",
    "trufflehog",
    "bandit",
    "zizmor",
    "scorecard",
    "dependency-review",
    "npm audit",
    "cargo audit",
    "cargo deny",
    "security",
    "vulnerability",
];

/// Job names that deploy or publish.
const DEPLOY_MARKERS: &[&str] = &["deploy", "publish", "release"];

/// Anything that leaves a trace of what a deploy did.
const LOGGING_MARKERS: &[&str] = &[
    "GITHUB_STEP_SUMMARY",
    "::notice",
    "::group",
    "echo ",
    "logger",
    "audit",
    "tee ",
];

fn is_security_step(step: &StepSpec) -> bool {
    let haystack = format!(
        "{} {} {}",
        step.name.as_deref().unwrap_or_default(),
        step.uses.as_deref().unwrap_or_default(),
        step.run.as_deref().unwrap_or_default()
    )
    .to_lowercase();
    SECURITY_STEP_MARKERS.iter().any(|m| haystack.contains(m))
}

/// `continue-on-error: true` on jobs and steps. On a security scan it turns a
/// failed check into a pass, so it is raised as a bypass instead.
pub fn check_continue_on_error(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    let mut findings = Vec::new();
    for job in &workflow.jobs {
        if job.continue_on_error {
            findings.push(
                Finding::new(
                    "continue_on_error",
                    Severity::Low,
                    format!("Job '{}' continues on error; failures are hidden", job.id),
                )
                .located(&job.id, None)
                .recommend("Remove continue-on-error or restrict it to non-critical jobs"),
            );
        }
        for step in job.steps.iter().filter(|s| s.continue_on_error) {
            let finding = if is_security_step(step) {
                Finding::new(
                    "security_check_bypass",
                    Severity::Medium,
                    format!(
                        "Security step '{}' continues on error, so its failures never block the workflow",
                        step.label()
                    ),
                )
                .recommend("Let security checks fail the job")
            } else {
                Finding::new(
                    "continue_on_error",
                    Severity::Low,
                    format!("Step '{}' continues on error; failures are hidden", step.label()),
                )
                .recommend("Remove continue-on-error or handle the failure explicitly")
            };
            findings.push(finding.located(&job.id, Some(&step.label())));
        }
    }
    findings
}

fn is_deploy_job(job: &JobSpec) -> bool {
    let name = format!("{} {}", job.id, job.name.as_deref().unwrap_or_default()).to_lowercase();
    DEPLOY_MARKERS.iter().any(|m| name.contains(m))
}

/// Deploy and publish jobs should leave an audit trail.
pub fn check_audit_logging(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    workflow
        .jobs
        .iter()
        .filter(|job| is_deploy_job(job) && job.uses.is_none())
        .filter(|job| {
            !job.run_steps()
                .any(|(_, run)| LOGGING_MARKERS.iter().any(|m| run.contains(m)))
        })
        .map(|job| {
            Finding::new(
                "missing_audit_logging",
                Severity::Low,
                format!("Deployment job '{}' does not record what it deployed", job.id),
            )
            .located(&job.id, None)
            .recommend("Write deployment details to $GITHUB_STEP_SUMMARY or a log")
        })
        .collect()
}

/// Neither the workflow nor any job declares `permissions`.
pub fn check_missing_permissions(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    if workflow.jobs.is_empty()
        || workflow.permissions.is_set()
        || workflow.jobs.iter().any(|j| j.permissions.is_set())
    {
        return Vec::new();
    }
    vec![Finding::new(
        "missing_permissions",
        Severity::Low,
        "Workflow does not declare permissions; GITHUB_TOKEN gets the repository default, which may be write",
    )
    .evidence("jobs", workflow.jobs.iter().map(|j| j.id.clone()).collect::<Vec<_>>())
    .recommend("Add a top-level `permissions:` block, e.g. `contents: read`")]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_workflow;

    #[test]
    fn test_continue_on_error_on_security_step() {
        let yaml = r#"
on: push
jobs:
  scan:
    runs-on: ubuntu-latest
    continue-on-error: true
    steps:
      - name: Run Trivy
        uses: aquasecurity/trivy-action@0.20.0
        continue-on-error: true
      - name: Build
        run: make
        continue-on-error: true
"#;
        let wf = parse_workflow(yaml).unwrap();
        let findings = check_continue_on_error(&wf, &RuleContext::default());
        let kinds: Vec<_> = findings.iter().map(|f| f.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["continue_on_error", "security_check_bypass", "continue_on_error"]
        );
        assert_eq!(findings[1].severity, Severity::Medium);
    }

    #[test]
    fn test_deploy_job_without_logging() {
        let yaml = r#"
on: push
jobs:
  deploy:
    runs-on: ubuntu-latest
    steps:
      - run: ./deploy.sh
  publish:
    runs-on: ubuntu-latest
    steps:
      - run: |
          ./publish.sh
          echo "published $VERSION" >> "$GITHUB_STEP_SUMMARY"
  test:
    runs-on: ubuntu-latest
    steps:
      - run: cargo test
"#;
        let wf = parse_workflow(yaml).unwrap();
        let findings = check_audit_logging(&wf, &RuleContext::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].evidence_str("job"), Some("deploy"));
    }

    #[test]
    fn test_missing_permissions() {
        let ctx = RuleContext::default();
        let wf = parse_workflow("on: push\njobs:\n  a:\n    runs-on: x\n").unwrap();
        assert_eq!(check_missing_permissions(&wf, &ctx).len(), 1);

        let wf = parse_workflow(
            "on: push\njobs:\n  a:\n    runs-on: x\n    permissions:\n      contents: read\n",
        )
        .unwrap();
        assert!(check_missing_permissions(&wf, &ctx).is_empty());
    }
}
