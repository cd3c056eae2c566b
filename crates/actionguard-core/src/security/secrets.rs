use super::SECRET_EXPRESSION_RE;
use crate::finding::{Finding, Severity};
use crate::parser::WorkflowDescriptor;
use crate::rules::RuleContext;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

struct SecretPattern {
    id: &'static str,
    description: &'static str,
    regex: &'static str,
    severity: Severity,
}

const SECRET_PATTERNS: &[SecretPattern] = &[
    SecretPattern {
        id: "generic-assignment",
        description: "Hardcoded API key or secret assignment",
        regex: r#"(?i)(api[_-]?key|secret[_-]?key|access[_-]?key|auth[_-]?token|password)\s*[:=]\s*['"][A-Za-z0-9+/=_\-]{8,}['"]"#,
        severity: Severity::Critical,
    },
    SecretPattern {
        id: "aws-access-key",
        description: "AWS access key ID",
        regex: r"AKIA[0-9A-Z]{16}",
        severity: Severity::Critical,
    },
    SecretPattern {
        id: "github-token",
        description: "GitHub personal access token",
        regex: r"(ghp|gho|ghs|ghu)_[A-Za-z0-9]{36}|github_pat_[A-Za-z0-9_]{60,}",
        severity: Severity::Critical,
    },
    SecretPattern {
        id: "docker-login-password",
        description: "Docker login with an inline password",
        regex: r"docker\s+login\b.*\s-p\s+[^\s$]\S*",
        severity: Severity::Critical,
    },
    SecretPattern {
        id: "base64-blob",
        description: "Base64-encoded blob piped to decode",
        regex: r"echo\s+[A-Za-z0-9+/=]{40,}\s*\|\s*base64",
        severity: Severity::High,
    },
    SecretPattern {
        id: "private-key",
        description: "Private key block",
        regex: r"-----BEGIN\s+(RSA\s+|EC\s+|OPENSSH\s+)?PRIVATE\s+KEY-----",
        severity: Severity::Critical,
    },
    SecretPattern {
        id: "slack-webhook",
        description: "Slack webhook URL",
        regex: r"https://hooks\.slack\.com/services/T[A-Z0-9]+/B[A-Z0-9]+/[A-Za-z0-9]+",
        severity: Severity::High,
    },
];

static COMPILED: LazyLock<Vec<(&'static SecretPattern, Regex)>> = LazyLock::new(|| {
    SECRET_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p.regex).ok().map(|re| (p, re)))
        .collect()
});

static SECRET_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(api[_-]?key|secret|token|password|passwd|credential|private[_-]?key)")
        .expect("static regex")
});

static LOG_SECRET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(echo|printf|write-host|write-output|console\.log|print)\b[^\n]*\$\{\{\s*secrets\.")
        .expect("static regex")
});

fn redact(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    if value.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}

fn hardcoded_finding(
    pattern: &SecretPattern,
    location: &str,
    preview: &str,
    job: Option<&str>,
) -> Finding {
    let finding = Finding::new(
        "hardcoded_secret",
        pattern.severity,
        format!("{} in {}", pattern.description, location),
    )
    .evidence("pattern", pattern.id)
    .evidence("location", location)
    .evidence("preview", redact(preview))
    .recommend("Move the value into repository or environment secrets and reference it with ${{ secrets.NAME }}");
    match job {
        Some(job) => finding.evidence("job", job),
        None => finding,
    }
}

fn scan_env(
    env: &BTreeMap<String, String>,
    scope: &str,
    job: Option<&str>,
    findings: &mut Vec<Finding>,
) {
    for (key, value) in env {
        if value.contains("${{") {
            continue;
        }
        let location = format!("{scope} env '{key}'");
        let by_value = COMPILED
            .iter()
            .find(|(p, re)| p.id != "generic-assignment" && re.is_match(value));
        if let Some((pattern, _)) = by_value {
            findings.push(hardcoded_finding(pattern, &location, value, job));
        } else if SECRET_NAME_RE.is_match(key) && value.len() >= 8 && !value.contains(' ') {
            findings.push(hardcoded_finding(&SECRET_PATTERNS[0], &location, value, job));
        }
    }
}

/// Literal credentials in `env` blocks at any level and in `run` scripts.
pub fn check_hardcoded_secrets(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    let mut findings = Vec::new();
    scan_env(&workflow.env, "workflow", None, &mut findings);

    for job in &workflow.jobs {
        scan_env(&job.env, &format!("job '{}'", job.id), Some(&job.id), &mut findings);
        for step in &job.steps {
            let scope = format!("job '{}' step '{}'", job.id, step.label());
            scan_env(&step.env, &scope, Some(&job.id), &mut findings);
            let Some(run) = &step.run else {
                continue;
            };
            for (pattern, re) in COMPILED.iter() {
                if let Some(m) = re.find(run) {
                    findings.push(hardcoded_finding(pattern, &format!("{scope} run"), m.as_str(), Some(&job.id)));
                }
            }
        }
    }
    findings
}

pub fn check_secret_in_log(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    workflow
        .jobs
        .iter()
        .flat_map(|job| job.run_steps().map(move |(step, run)| (job, step, run)))
        .filter_map(|(job, step, run)| {
            let line = LOG_SECRET_RE.find(run)?;
            Some(
                Finding::new(
                    "secret_in_log",
                    Severity::High,
                    format!("Step '{}' prints a secret to the job log", step.label()),
                )
                .located(&job.id, Some(&step.label()))
                .evidence("command", line.as_str().trim())
                .recommend("Never print secrets; log masking is best-effort and fails on transformed values"),
            )
        })
        .collect()
}

/// Secrets outside an `environment` skip deployment protection rules.
pub fn check_secrets_without_environment(
    workflow: &WorkflowDescriptor,
    _ctx: &RuleContext,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    for job in &workflow.jobs {
        if job.environment.is_some() || job.uses.is_some() {
            continue;
        }
        let text = job.text();
        let mut names: Vec<String> = SECRET_EXPRESSION_RE
            .captures_iter(&text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .filter(|name| name != "GITHUB_TOKEN")
            .collect();
        names.sort();
        names.dedup();
        if names.is_empty() {
            continue;
        }
        findings.push(
            Finding::new(
                "secrets_without_environment",
                Severity::Low,
                format!(
                    "Job '{}' uses secrets without a deployment environment",
                    job.id
                ),
            )
            .located(&job.id, None)
            .evidence("secrets", names)
            .recommend("Scope secrets to an environment with required reviewers or branch restrictions"),
        );
    }
    findings
}

pub fn check_secrets_inherit(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    workflow
        .jobs
        .iter()
        .filter(|job| job.secrets_inherit)
        .map(|job| {
            Finding::new(
                "secrets_inherit",
                Severity::Medium,
                format!(
                    "Job '{}' passes every repository secret to the called workflow",
                    job.id
                ),
            )
            .located(&job.id, None)
            .maybe_evidence("workflow", job.uses.as_deref())
            .recommend("Pass only the secrets the called workflow needs")
        })
        .collect()
}

pub fn check_secrets_to_untrusted_action(
    workflow: &WorkflowDescriptor,
    ctx: &RuleContext,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (job, step) in workflow.steps() {
        let Some(uses) = step.uses.as_deref() else {
            continue;
        };
        if uses.starts_with("./") || uses.starts_with("docker://") || ctx.trusted.is_trusted(uses) {
            continue;
        }
        let inputs: Vec<&str> = step
            .with
            .iter()
            .chain(step.env.iter())
            .filter(|(_, v)| v.contains("secrets."))
            .map(|(k, _)| k.as_str())
            .collect();
        if inputs.is_empty() {
            continue;
        }
        findings.push(
            Finding::new(
                "secrets_to_untrusted_action",
                Severity::High,
                format!("Secrets are passed to third-party action '{}'", uses),
            )
            .located(&job.id, Some(&step.label()))
            .evidence("action", uses)
            .evidence("inputs", inputs)
            .recommend("Pin the action to a reviewed commit SHA or replace it with a trusted publisher's action"),
        );
    }
    findings
}
