//! Injection, credential exposure, privilege escalation and supply-chain rules.

pub mod checkout;
pub mod escalation;
pub mod injection;
pub mod matrix;
pub mod permissions;
pub mod runners;
pub mod scanner;
pub mod secrets;
pub mod supply_chain;
pub mod triggers;
pub mod unpinnable;

use crate::rules::{Rule, RuleSubset};
use regex::Regex;
use std::sync::LazyLock;

/// Expression contexts an external contributor can control.
pub const UNTRUSTED_CONTEXTS: &[&str] = &[
    "github.event.issue.title",
    "github.event.issue.body",
    "github.event.pull_request.title",
    "github.event.pull_request.body",
    "github.event.pull_request.head.ref",
    "github.event.pull_request.head.label",
    "github.event.comment.body",
    "github.event.review.body",
    "github.event.review_comment.body",
    "github.event.head_commit.message",
    "github.event.head_commit.author.name",
    "github.event.head_commit.author.email",
    "github.event.workflow_run.head_branch",
    "github.event.workflow_run.head_commit.message",
    "github.event.discussion.title",
    "github.event.discussion.body",
    "github.event.pages",
    "github.event.commits",
    "github.head_ref",
];

/// `${{ ... }}` with the inner expression captured.
pub static EXPRESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*(.*?)\s*\}\}").expect("static regex"));

/// Any expression rooted in event payload or PR refs.
pub static ATTACKER_EXPRESSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{[^}]*(github\.event\.|github\.head_ref|github\.base_ref)[^}]*\}\}")
        .expect("static regex")
});

/// Issue, PR or comment titles and bodies, or the PR head ref.
pub static TITLE_BODY_EXPRESSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\$\{\{[^}]*(github\.event\.(issue|pull_request|comment)\.(title|body)|github\.head_ref)[^}]*\}\}",
    )
    .expect("static regex")
});

pub static SECRET_EXPRESSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{\s*secrets\.([A-Za-z_][A-Za-z0-9_]*)").expect("static regex")
});

/// Untrusted contexts referenced by expressions in `text`, in order, once each.
pub fn untrusted_contexts_in(text: &str) -> Vec<&'static str> {
    let mut found = Vec::new();
    for caps in EXPRESSION_RE.captures_iter(text) {
        let Some(inner) = caps.get(1) else {
            continue;
        };
        for ctx in UNTRUSTED_CONTEXTS {
            if inner.as_str().contains(ctx) && !found.contains(ctx) {
                found.push(*ctx);
            }
        }
    }
    found
}

pub fn has_expression(text: &str) -> bool {
    text.contains("${{")
}

macro_rules! rule {
    ($id:literal, $check:path) => {
        Rule {
            id: $id,
            subset: RuleSubset::Security,
            check: $check,
        }
    };
}

pub const RULES: &[Rule] = &[
    rule!("write-all-permissions", permissions::check_write_all_permissions),
    rule!("oidc-token-exposure", permissions::check_oidc_exposure),
    rule!("dangerous-events", triggers::check_dangerous_events),
    rule!("workflow-run-checkout", triggers::check_workflow_run_checkout),
    rule!("self-hosted-runners", runners::check_self_hosted_runners),
    rule!("shell-injection", injection::check_shell_injection),
    rule!("expression-injection", injection::check_expression_injection),
    rule!("github-env-injection", injection::check_github_env_injection),
    rule!("powershell-injection", injection::check_powershell_injection),
    rule!("github-script-injection", injection::check_github_script_injection),
    rule!("token-escalation", escalation::check_token_escalation),
    rule!("branch-protection-bypass", escalation::check_branch_protection_bypass),
    rule!("matrix-secrets", matrix::check_matrix_secrets),
    rule!("matrix-size", matrix::check_matrix_size),
    rule!("hardcoded-secrets", secrets::check_hardcoded_secrets),
    rule!("secret-in-log", secrets::check_secret_in_log),
    rule!("secrets-without-environment", secrets::check_secrets_without_environment),
    rule!("secrets-inherit", secrets::check_secrets_inherit),
    rule!("secrets-to-untrusted-action", secrets::check_secrets_to_untrusted_action),
    rule!("checkout-credentials", checkout::check_persist_credentials),
    rule!("checkout-full-history", checkout::check_full_history),
    rule!("checkout-unsafe-ref", checkout::check_unsafe_ref),
    rule!("cross-repository-checkout", checkout::check_cross_repository),
    rule!("docker-step-images", unpinnable::check_docker_steps),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untrusted_contexts_in() {
        let text = "echo \"${{ github.event.issue.title }}\" ${{ github.sha }} ${{github.head_ref}}";
        assert_eq!(
            untrusted_contexts_in(text),
            vec!["github.event.issue.title", "github.head_ref"]
        );
        assert!(untrusted_contexts_in("echo ${{ github.sha }}").is_empty());
    }

    #[test]
    fn test_attacker_expression() {
        assert!(ATTACKER_EXPRESSION_RE.is_match("${{ github.event.pull_request.number }}"));
        assert!(ATTACKER_EXPRESSION_RE.is_match("${{ github.base_ref }}"));
        assert!(!ATTACKER_EXPRESSION_RE.is_match("${{ github.ref }}"));
        assert!(TITLE_BODY_EXPRESSION_RE.is_match("${{ github.event.comment.body }}"));
        assert!(!TITLE_BODY_EXPRESSION_RE.is_match("${{ github.event.review.body }}"));
    }
}
