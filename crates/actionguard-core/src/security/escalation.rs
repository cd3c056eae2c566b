use crate::finding::{Finding, Severity};
use crate::parser::WorkflowDescriptor;
use crate::rules::RuleContext;
use regex::Regex;
use std::sync::LazyLock;

struct CommandPattern {
    description: &'static str,
    regex: &'static str,
}

const TOKEN_ESCALATION_PATTERNS: &[CommandPattern] = &[
    CommandPattern {
        description: "token embedded in a git remote URL",
        regex: r"(?i)https://[^\s]*(x-access-token|oauth2|\$\{\{\s*secrets\.)[^@\n]*@github\.com",
    },
    CommandPattern {
        description: "git credential helper storing a token",
        regex: r"(?i)git\s+config\s+.*credential\.helper\s+store",
    },
    CommandPattern {
        description: "gh CLI logged in with a secret token",
        regex: r"(?i)gh\s+auth\s+login\b.*--with-token",
    },
    CommandPattern {
        description: "token exported to later steps through GITHUB_ENV",
        regex: r"(?i)(TOKEN|PAT)[A-Z_]*=\$\{\{\s*secrets\.[^}]*\}\}.*>>\s*\$\{?GITHUB_ENV",
    },
    CommandPattern {
        description: "API call changing collaborators, permissions or secrets",
        regex: r"(?i)gh\s+api\s+.*(-X|--method)\s+(PUT|PATCH|POST|DELETE)\b.*/(collaborators|permissions|actions/secrets|actions/permissions)",
    },
    CommandPattern {
        description: "GitHub App installation token minted inside the job",
        regex: r"(?i)/app/installations/[^/\s]+/access_tokens",
    },
];

const BRANCH_PROTECTION_PATTERNS: &[CommandPattern] = &[
    CommandPattern {
        description: "pull request merged with admin override",
        regex: r"(?i)gh\s+pr\s+merge\b.*--admin",
    },
    CommandPattern {
        description: "pull request approved by the workflow",
        regex: r"(?i)gh\s+pr\s+review\b.*(--approve|-a\b)",
    },
    CommandPattern {
        description: "auto-merge enabled by the workflow",
        regex: r"(?i)gh\s+pr\s+merge\b.*--auto",
    },
    CommandPattern {
        description: "branch protection modified through the API",
        regex: r"(?i)gh\s+api\s+.*branches/[^\s/]+/protection",
    },
    CommandPattern {
        description: "approval submitted through the reviews API",
        regex: r#"(?i)pulls/[^\s/]+/reviews.*APPROVE"#,
    },
];

/// Actions whose whole purpose is approving or merging pull requests.
const AUTO_APPROVE_ACTIONS: &[&str] = &[
    "hmarr/auto-approve-action",
    "juliangruber/approve-pull-request-action",
    "pascalgn/automerge-action",
    "peter-evans/enable-pull-request-automerge",
    "ahmadnassri/action-dependabot-auto-merge",
    "fastify/github-action-merge-dependabot",
];

fn compile(patterns: &'static [CommandPattern]) -> Vec<(&'static CommandPattern, Regex)> {
    patterns
        .iter()
        .filter_map(|p| Regex::new(p.regex).ok().map(|re| (p, re)))
        .collect()
}

static TOKEN_ESCALATION: LazyLock<Vec<(&'static CommandPattern, Regex)>> =
    LazyLock::new(|| compile(TOKEN_ESCALATION_PATTERNS));
static BRANCH_PROTECTION: LazyLock<Vec<(&'static CommandPattern, Regex)>> =
    LazyLock::new(|| compile(BRANCH_PROTECTION_PATTERNS));

fn first_match(patterns: &[(&'static CommandPattern, Regex)], text: &str) -> Option<&'static str> {
    patterns
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(p, _)| p.description)
}

pub fn check_token_escalation(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    let mut findings = Vec::new();
    for job in &workflow.jobs {
        for (step, run) in job.run_steps() {
            if let Some(description) = first_match(&TOKEN_ESCALATION, run) {
                findings.push(
                    Finding::new(
                        "token_escalation",
                        Severity::High,
                        format!("Step '{}': {}", step.label(), description),
                    )
                    .located(&job.id, Some(&step.label()))
                    .evidence("pattern", description)
                    .recommend("Keep tokens in step-scoped env and never persist them to disk, remotes or GITHUB_ENV"),
                );
            }
        }
    }
    findings
}

pub fn check_branch_protection_bypass(
    workflow: &WorkflowDescriptor,
    _ctx: &RuleContext,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (job, step) in workflow.steps() {
        let description = match (&step.run, step.action_name()) {
            (Some(run), _) => first_match(&BRANCH_PROTECTION, run),
            (None, Some(action)) => AUTO_APPROVE_ACTIONS
                .contains(&action.as_str())
                .then_some("pull request approved or merged by an action"),
            (None, None) => None,
        };
        if let Some(description) = description {
            findings.push(
                Finding::new(
                    "branch_protection_bypass",
                    Severity::High,
                    format!("Step '{}': {}", step.label(), description),
                )
                .located(&job.id, Some(&step.label()))
                .evidence("pattern", description)
                .recommend("Require human review; do not let workflows approve or force-merge pull requests"),
            );
        }
    }
    findings
}
