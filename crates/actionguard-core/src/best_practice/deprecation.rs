use crate::action_ref::{name_without_version, version_of};
use crate::finding::{Finding, Severity};
use crate::parser::WorkflowDescriptor;
use crate::rules::RuleContext;

struct DeprecatedAction {
    action: &'static str,
    /// Versions matched by prefix, so `v2` also covers `v2.1.0`.
    versions: &'static [&'static str],
    reason: &'static str,
    replacement: &'static str,
}

const DEPRECATED_ACTIONS: &[DeprecatedAction] = &[
    DeprecatedAction {
        action: "actions/checkout",
        versions: &["v1", "v2"],
        reason: "runs on a Node.js version that is no longer supported",
        replacement: "actions/checkout@v4",
    },
    DeprecatedAction {
        action: "actions/setup-node",
        versions: &["v1", "v2"],
        reason: "runs on a Node.js version that is no longer supported",
        replacement: "actions/setup-node@v4",
    },
    DeprecatedAction {
        action: "actions/setup-python",
        versions: &["v1", "v2", "v3"],
        reason: "runs on a Node.js version that is no longer supported",
        replacement: "actions/setup-python@v5",
    },
    DeprecatedAction {
        action: "actions/setup-java",
        versions: &["v1", "v2"],
        reason: "runs on a Node.js version that is no longer supported",
        replacement: "actions/setup-java@v4",
    },
    DeprecatedAction {
        action: "actions/setup-go",
        versions: &["v1", "v2", "v3"],
        reason: "runs on a Node.js version that is no longer supported",
        replacement: "actions/setup-go@v5",
    },
    DeprecatedAction {
        action: "actions/upload-artifact",
        versions: &["v1", "v2", "v3"],
        reason: "artifact actions before v4 have been shut down",
        replacement: "actions/upload-artifact@v4",
    },
    DeprecatedAction {
        action: "actions/download-artifact",
        versions: &["v1", "v2", "v3"],
        reason: "artifact actions before v4 have been shut down",
        replacement: "actions/download-artifact@v4",
    },
    DeprecatedAction {
        action: "actions/cache",
        versions: &["v1", "v2", "v3"],
        reason: "the legacy cache service backing these versions has been retired",
        replacement: "actions/cache@v4",
    },
    DeprecatedAction {
        action: "actions/create-release",
        versions: &[],
        reason: "the repository is archived and unmaintained",
        replacement: "softprops/action-gh-release or the gh CLI",
    },
    DeprecatedAction {
        action: "actions/upload-release-asset",
        versions: &[],
        reason: "the repository is archived and unmaintained",
        replacement: "softprops/action-gh-release or the gh CLI",
    },
    DeprecatedAction {
        action: "actions/setup-ruby",
        versions: &[],
        reason: "the repository is archived and unmaintained",
        replacement: "ruby/setup-ruby",
    },
    DeprecatedAction {
        action: "github/codeql-action/init",
        versions: &["v1", "v2"],
        reason: "CodeQL Action v1 and v2 are no longer supported",
        replacement: "github/codeql-action/init@v3",
    },
    DeprecatedAction {
        action: "github/codeql-action/analyze",
        versions: &["v1", "v2"],
        reason: "CodeQL Action v1 and v2 are no longer supported",
        replacement: "github/codeql-action/analyze@v3",
    },
];

fn version_matches(version: &str, deprecated: &str) -> bool {
    version == deprecated
        || version
            .strip_prefix(deprecated)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Look a single `uses:` value up in the deprecation table.
pub fn check_deprecated_reference(uses: &str) -> Vec<Finding> {
    let name = name_without_version(uses).to_lowercase();
    let version = version_of(uses).unwrap_or_default();

    DEPRECATED_ACTIONS
        .iter()
        .filter(|d| d.action == name)
        .filter(|d| {
            d.versions.is_empty() || d.versions.iter().any(|v| version_matches(version, v))
        })
        .map(|d| {
            Finding::new(
                "deprecated_action",
                Severity::Medium,
                format!("'{}' is deprecated: {}", uses, d.reason),
            )
            .evidence("action", name.as_str())
            .evidence("version", version)
            .recommend(format!("Replace with {}", d.replacement))
        })
        .collect()
}

pub fn check_deprecated_actions(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (job, step) in workflow.steps() {
        let Some(uses) = step.uses.as_deref() else {
            continue;
        };
        findings.extend(
            check_deprecated_reference(uses)
                .into_iter()
                .map(|f| f.located(&job.id, Some(&step.label()))),
        );
    }
    findings
}

/// Workflow commands that were disabled or replaced by environment files.
const WORKFLOW_COMMANDS: &[(&str, Severity, &str, &str)] = &[
    (
        "::set-output",
        Severity::Low,
        "deprecated_workflow_command",
        "Write to $GITHUB_OUTPUT instead",
    ),
    (
        "::save-state",
        Severity::Low,
        "deprecated_workflow_command",
        "Write to $GITHUB_STATE instead",
    ),
    (
        "::set-env",
        Severity::High,
        "insecure_workflow_command",
        "Write to $GITHUB_ENV instead; ::set-env allows environment injection from log output",
    ),
    (
        "::add-path",
        Severity::High,
        "insecure_workflow_command",
        "Write to $GITHUB_PATH instead; ::add-path allows PATH injection from log output",
    ),
];

pub fn check_workflow_commands(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    let mut findings = Vec::new();
    for job in &workflow.jobs {
        for (step, run) in job.run_steps() {
            for (command, severity, kind, recommendation) in WORKFLOW_COMMANDS {
                if run.contains(command) {
                    findings.push(
                        Finding::new(
                            kind,
                            *severity,
                            format!("Step uses the `{}` workflow command", command),
                        )
                        .located(&job.id, Some(&step.label()))
                        .evidence("command", *command)
                        .recommend(*recommendation),
                    );
                }
            }
        }
    }
    findings
}
