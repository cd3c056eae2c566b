//! Versioning, pinning and hygiene rules.

pub mod artifacts;
pub mod deprecation;
pub mod hygiene;
pub mod pinning;
pub mod versions;

use crate::rules::{Rule, RuleSubset};

macro_rules! rule {
    ($id:literal, $check:path) => {
        Rule {
            id: $id,
            subset: RuleSubset::BestPractice,
            check: $check,
        }
    };
}

pub const RULES: &[Rule] = &[
    rule!("pinned-version", pinning::check_workflow_pinned_versions),
    rule!("hash-pinning", pinning::check_hash_pinning),
    rule!("deprecated-actions", deprecation::check_deprecated_actions),
    rule!("deprecated-commands", deprecation::check_workflow_commands),
    rule!("continue-on-error", hygiene::check_continue_on_error),
    rule!("audit-logging", hygiene::check_audit_logging),
    rule!("missing-permissions", hygiene::check_missing_permissions),
    rule!("artifact-retention", artifacts::check_artifact_retention),
    rule!("artifact-paths", artifacts::check_artifact_paths),
];
