use super::{
    has_expression, untrusted_contexts_in, ATTACKER_EXPRESSION_RE, TITLE_BODY_EXPRESSION_RE,
};
use crate::finding::{Finding, Severity};
use crate::parser::{ActionDescriptor, JobSpec, StepSpec, WorkflowDescriptor};
use crate::rules::RuleContext;
use regex::Regex;
use std::sync::LazyLock;

/// `eval`, `sh -c`, or anything piped into a shell.
static SHELL_EXEC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\beval\b|\b(ba|z|da|k)?sh\s+-c\b|\|\s*(sudo\s+)?(ba|z|da|k)?sh\b")
        .expect("static regex")
});

/// `$( ... ${{ github.event.* }} ... )` or the backtick form.
static COMMAND_SUBSTITUTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\$\([^)]*\$\{\{[^}]*github\.event\.[^}]*\}\}[^)]*\)|`[^`]*\$\{\{[^}]*github\.event\.[^}]*\}\}[^`]*`",
    )
    .expect("static regex")
});

/// Download-and-execute and inline interpreter idioms.
static DANGEROUS_COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(curl|wget)\b[^|\n]*\|\s*(sudo\s+)?(ba|z|da)?sh\b|\bsource\s+<\(\s*(curl|wget)|\bpython3?\s+-c\b|\bnode\s+-e\b|\bperl\s+-e\b",
    )
    .expect("static regex")
});

static GITHUB_ENV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{?(GITHUB_ENV|GITHUB_PATH)\b").expect("static regex"));

static POWERSHELL_EVAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(invoke-expression|iex)\b").expect("static regex"));

static POWERSHELL_DYNAMIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(invoke-expression|iex|invoke-command|start-process)\b|\[scriptblock\]::create|&\s*\(\s*\$",
    )
    .expect("static regex")
});

static JS_DYNAMIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\beval\s*\(|\bnew\s+Function\s*\(|child_process|\bexecSync\s*\(")
        .expect("static regex")
});

static INPUT_EXPRESSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{\s*inputs\.([A-Za-z0-9_-]+)\s*\}\}").expect("static regex")
});

const GITHUB_SCRIPT: &str = "actions/github-script";

/// First line where a title/body/head_ref expression reaches `eval`, `sh -c`
/// or a piped shell.
fn shell_exec_injection(run: &str) -> Option<(usize, String)> {
    run.lines().enumerate().find_map(|(i, line)| {
        if !SHELL_EXEC_RE.is_match(line) {
            return None;
        }
        TITLE_BODY_EXPRESSION_RE
            .find(line)
            .map(|m| (i + 1, m.as_str().to_string()))
    })
}

fn step_finding(kind: &str, severity: Severity, job: &JobSpec, step: &StepSpec, what: &str) -> Finding {
    Finding::new(
        kind,
        severity,
        format!("Job '{}', step '{}': {}", job.id, step.label(), what),
    )
    .located(&job.id, Some(&step.label()))
}

const ENV_RECOMMENDATION: &str =
    "Assign the expression to an environment variable (`env: VALUE: ${{ ... }}`) and use \"$VALUE\" in the script";

/// Shell injection, tiered: executed title/body input is critical, command
/// substitution around event data is high, and download-and-execute idioms
/// next to any expression are high. One finding per tier per step.
pub fn check_shell_injection(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    let mut findings = Vec::new();
    for job in &workflow.jobs {
        for (step, run) in job.run_steps() {
            if let Some((line, expression)) = shell_exec_injection(run) {
                findings.push(
                    step_finding(
                        "shell_injection",
                        Severity::Critical,
                        job,
                        step,
                        "untrusted input is executed by a shell",
                    )
                    .evidence("expression", expression)
                    .evidence("line", line)
                    .recommend(ENV_RECOMMENDATION),
                );
            }

            if let Some(m) = COMMAND_SUBSTITUTION_RE.find(run) {
                findings.push(
                    step_finding(
                        "command_substitution_injection",
                        Severity::High,
                        job,
                        step,
                        "event data is evaluated inside a command substitution",
                    )
                    .evidence("pattern", m.as_str())
                    .recommend(ENV_RECOMMENDATION),
                );
            }

            if let Some(line) = run
                .lines()
                .find(|line| has_expression(line) && DANGEROUS_COMMAND_RE.is_match(line))
            {
                findings.push(
                    step_finding(
                        "dangerous_shell_pattern",
                        Severity::High,
                        job,
                        step,
                        "a download-and-execute or inline interpreter command also interpolates an expression",
                    )
                    .evidence("command", line.trim())
                    .recommend("Download to a file, verify its checksum, and avoid interpolating expressions into the command"),
                );
            }
        }
    }
    findings
}

/// Untrusted contexts interpolated straight into `run:`. Steps already
/// reported as executed shell injection are skipped.
pub fn check_expression_injection(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    let mut findings = Vec::new();
    for job in &workflow.jobs {
        for (step, run) in job.run_steps() {
            if shell_exec_injection(run).is_some() {
                continue;
            }
            for context in untrusted_contexts_in(run) {
                findings.push(
                    step_finding(
                        "expression_injection",
                        Severity::High,
                        job,
                        step,
                        &format!("`{}` is used directly in a run script", context),
                    )
                    .evidence("context", context)
                    .recommend(format!(
                        "Assign to an environment variable first:\n  env:\n    SAFE_VALUE: ${{{{ {} }}}}\nThen use \"$SAFE_VALUE\" in the run step.",
                        context
                    )),
                );
            }
        }
    }
    findings
}

/// Event data written to `$GITHUB_ENV` or `$GITHUB_PATH` changes the
/// environment of every later step.
pub fn check_github_env_injection(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    let mut findings = Vec::new();
    for job in &workflow.jobs {
        for (step, run) in job.run_steps() {
            let hit = run.lines().find_map(|line| {
                let target = GITHUB_ENV_RE.captures(line)?.get(1)?.as_str();
                let expression = ATTACKER_EXPRESSION_RE.find(line)?;
                Some((target, expression.as_str()))
            });
            if let Some((target, expression)) = hit {
                findings.push(
                    step_finding(
                        "github_env_injection",
                        Severity::Critical,
                        job,
                        step,
                        &format!("untrusted input is written to ${}", target),
                    )
                    .evidence("target", target)
                    .evidence("expression", expression)
                    .recommend("Validate event data before writing it to environment files, or avoid doing so"),
                );
            }
        }
    }
    findings
}

pub fn check_powershell_injection(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    let mut findings = Vec::new();
    for job in &workflow.jobs {
        for (step, run) in job.run_steps() {
            if POWERSHELL_EVAL_RE.is_match(run) {
                if let Some(m) = TITLE_BODY_EXPRESSION_RE.find(run) {
                    findings.push(
                        step_finding(
                            "powershell_injection",
                            Severity::Critical,
                            job,
                            step,
                            "untrusted input reaches Invoke-Expression",
                        )
                        .evidence("expression", m.as_str())
                        .recommend("Pass the value through $env: and never feed it to Invoke-Expression"),
                    );
                    continue;
                }
            }
            let powershell = step.is_powershell() || POWERSHELL_EVAL_RE.is_match(run);
            if !powershell || !has_expression(run) {
                continue;
            }
            if let Some(m) = POWERSHELL_DYNAMIC_RE.find(run) {
                findings.push(
                    step_finding(
                        "powershell_dynamic_execution",
                        Severity::High,
                        job,
                        step,
                        "PowerShell executes dynamically built commands containing expressions",
                    )
                    .evidence("pattern", m.as_str())
                    .recommend("Avoid dynamic execution; pass expressions through environment variables"),
                );
            }
        }
    }
    findings
}

pub fn check_github_script_injection(
    workflow: &WorkflowDescriptor,
    _ctx: &RuleContext,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (job, step) in workflow.steps() {
        if !step.uses_action(GITHUB_SCRIPT) {
            continue;
        }
        let Some(script) = step.with.get("script") else {
            continue;
        };
        let contexts = untrusted_contexts_in(script);
        if !contexts.is_empty() {
            findings.push(
                step_finding(
                    "github_script_injection",
                    Severity::Critical,
                    job,
                    step,
                    "untrusted input is interpolated into a github-script body",
                )
                .evidence("contexts", contexts)
                .recommend("Read event data from `context.payload` inside the script instead of interpolating it"),
            );
        } else if has_expression(script) {
            if let Some(m) = JS_DYNAMIC_RE.find(script) {
                findings.push(
                    step_finding(
                        "github_script_dynamic_eval",
                        Severity::High,
                        job,
                        step,
                        "github-script evaluates code built from expressions",
                    )
                    .evidence("pattern", m.as_str())
                    .recommend("Avoid eval, new Function and child_process in github-script"),
                );
            }
        }
    }
    findings
}

/// Composite action steps that splice `${{ inputs.* }}` into shell code.
pub fn check_action_input_injection(action: &ActionDescriptor) -> Vec<Finding> {
    if !action.is_composite() {
        return Vec::new();
    }
    action
        .runs
        .steps
        .iter()
        .filter_map(|step| {
            let run = step.run.as_deref()?;
            let mut inputs: Vec<String> = Vec::new();
            for caps in INPUT_EXPRESSION_RE.captures_iter(run) {
                let name = caps[1].to_string();
                if !inputs.contains(&name) {
                    inputs.push(name);
                }
            }
            if inputs.is_empty() {
                return None;
            }
            Some(
                Finding::new(
                    "action_input_injection",
                    Severity::Medium,
                    format!(
                        "Step '{}' interpolates action inputs ({}) directly into a shell script",
                        step.label(),
                        inputs.join(", ")
                    ),
                )
                .evidence("step", step.label())
                .evidence("inputs", inputs)
                .recommend("Map inputs to environment variables and quote them in the script"),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_action, parse_workflow};

    fn workflow_with_run(run: &str) -> WorkflowDescriptor {
        let yaml = format!(
            "on: issues\njobs:\n  greet:\n    runs-on: ubuntu-latest\n    steps:\n      - name: Greet\n        run: |\n{}\n",
            run.lines()
                .map(|l| format!("          {}", l))
                .collect::<Vec<_>>()
                .join("\n")
        );
        parse_workflow(&yaml).unwrap()
    }

    fn kinds(findings: &[Finding]) -> Vec<&str> {
        findings.iter().map(|f| f.kind.as_str()).collect()
    }

    #[test]
    fn test_eval_of_title_is_critical() {
        let wf = workflow_with_run("eval \"echo ${{ github.event.issue.title }}\"");
        let findings = check_shell_injection(&wf, &RuleContext::default());
        assert_eq!(kinds(&findings), vec!["shell_injection"]);
        assert_eq!(findings[0].severity, Severity::Critical);
        // already reported at the higher tier
        assert!(check_expression_injection(&wf, &RuleContext::default()).is_empty());
    }

    #[test]
    fn test_command_substitution_is_high() {
        let wf = workflow_with_run("NUM=$(echo ${{ github.event.issue.number }})");
        let findings = check_shell_injection(&wf, &RuleContext::default());
        assert_eq!(kinds(&findings), vec!["command_substitution_injection"]);
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn test_curl_pipe_with_expression() {
        let wf = workflow_with_run("curl -sSL https://x.sh/${{ env.VERSION }} | bash");
        let findings = check_shell_injection(&wf, &RuleContext::default());
        assert_eq!(kinds(&findings), vec!["dangerous_shell_pattern"]);

        let wf = workflow_with_run("curl -sSL https://x.sh/install | bash");
        assert!(check_shell_injection(&wf, &RuleContext::default()).is_empty());
    }

    #[test]
    fn test_one_finding_per_tier() {
        let wf = workflow_with_run(
            "eval \"${{ github.event.issue.title }}\"\nsh -c \"${{ github.event.issue.body }}\"",
        );
        let findings = check_shell_injection(&wf, &RuleContext::default());
        assert_eq!(kinds(&findings), vec!["shell_injection"]);
    }

    #[test]
    fn test_direct_expression_injection() {
        let wf = workflow_with_run("echo \"${{ github.event.issue.title }}\"");
        let findings = check_expression_injection(&wf, &RuleContext::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].evidence_str("context"), Some("github.event.issue.title"));

        let wf = workflow_with_run("echo ${{ github.sha }}");
        assert!(check_expression_injection(&wf, &RuleContext::default()).is_empty());
    }

    #[test]
    fn test_github_env_injection() {
        let wf = workflow_with_run("echo \"TITLE=${{ github.event.issue.title }}\" >> $GITHUB_ENV");
        let findings = check_github_env_injection(&wf, &RuleContext::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].evidence_str("target"), Some("GITHUB_ENV"));
    }

    #[test]
    fn test_powershell_tiers() {
        let yaml = r#"
on: issues
jobs:
  win:
    runs-on: windows-latest
    steps:
      - shell: pwsh
        run: Invoke-Expression "${{ github.event.issue.body }}"
      - shell: pwsh
        run: Start-Process "${{ env.TOOL }}"
      - shell: pwsh
        run: Write-Host "${{ env.TOOL }}"
"#;
        let wf = parse_workflow(yaml).unwrap();
        let findings = check_powershell_injection(&wf, &RuleContext::default());
        assert_eq!(
            kinds(&findings),
            vec!["powershell_injection", "powershell_dynamic_execution"]
        );
    }

    #[test]
    fn test_github_script() {
        let yaml = r#"
on: issue_comment
jobs:
  bot:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/github-script@v7
        with:
          script: |
            const body = "${{ github.event.comment.body }}";
      - uses: actions/github-script@v7
        with:
          script: |
            eval("${{ env.CODE }}");
"#;
        let wf = parse_workflow(yaml).unwrap();
        let findings = check_github_script_injection(&wf, &RuleContext::default());
        assert_eq!(
            kinds(&findings),
            vec!["github_script_injection", "github_script_dynamic_eval"]
        );
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn test_action_input_injection() {
        let action = parse_action(
            "runs:\n  using: composite\n  steps:\n    - run: echo ${{ inputs.name }} ${{ inputs.name }}\n      shell: bash\n    - run: echo ok\n      shell: bash\n",
        )
        .unwrap();
        let findings = check_action_input_injection(&action);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].evidence["inputs"], serde_json::json!(["name"]));
    }
}
