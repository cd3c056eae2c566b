use crate::action_ref::{name_without_version, RefKind};
use crate::finding::{Finding, Severity};
use crate::rules::RuleContext;

/// Owners that are placeholders or throwaway accounts more often than real
/// publishers.
const SUSPICIOUS_OWNERS: &[&str] = &[
    "test", "temp", "tmp", "demo", "example", "fake", "sample", "user", "hacker", "admin",
];

/// Known misspellings of popular actions, mapped to the intended action.
const TYPOSQUAT_MAP: &[(&str, &str)] = &[
    ("action/checkout", "actions/checkout"),
    ("actions/chekout", "actions/checkout"),
    ("actions/checkot", "actions/checkout"),
    ("actions/checkuot", "actions/checkout"),
    ("actons/checkout", "actions/checkout"),
    ("actiosn/checkout", "actions/checkout"),
    ("actions-checkout/checkout", "actions/checkout"),
    ("action/setup-node", "actions/setup-node"),
    ("actions/setup-nodejs", "actions/setup-node"),
    ("actions/setup-nod", "actions/setup-node"),
    ("action/setup-python", "actions/setup-python"),
    ("actions/setup-pyhton", "actions/setup-python"),
    ("actions/setup-phyton", "actions/setup-python"),
    ("actions/setup-go-lang", "actions/setup-go"),
    ("action/cache", "actions/cache"),
    ("actions/caches", "actions/cache"),
    ("action/upload-artifact", "actions/upload-artifact"),
    ("actions/upload-artifacts", "actions/upload-artifact"),
    ("actions/uplaod-artifact", "actions/upload-artifact"),
    ("actions/download-artifacts", "actions/download-artifact"),
    ("actions/github_script", "actions/github-script"),
    ("action/github-script", "actions/github-script"),
    ("docker/login-actions", "docker/login-action"),
    ("docker/build-push-actions", "docker/build-push-action"),
    ("aws-action/configure-aws-credentials", "aws-actions/configure-aws-credentials"),
    ("awsactions/configure-aws-credentials", "aws-actions/configure-aws-credentials"),
];

fn owner_of(name: &str) -> Option<&str> {
    name.split('/').next().filter(|o| !o.is_empty() && name.contains('/'))
}

fn is_local_or_docker(uses: &str) -> bool {
    uses.starts_with("./") || uses.starts_with("docker://")
}

/// Secondary signals that make an untrusted pinned action worth a closer look.
fn suspicion(name: &str, owner: &str) -> Option<&'static str> {
    if name.contains("..") || name.contains("--") {
        Some("name contains repeated separators")
    } else if owner.chars().count() < 3 {
        Some("owner name is unusually short")
    } else if SUSPICIOUS_OWNERS.contains(&owner) {
        Some("owner name is a generic placeholder")
    } else {
        None
    }
}

/// Actions from publishers outside the trusted list.
pub fn check_untrusted_action(uses: &str, ctx: &RuleContext) -> Vec<Finding> {
    let uses = uses.trim();
    if is_local_or_docker(uses) || ctx.trusted.is_trusted(uses) {
        return Vec::new();
    }
    let name = name_without_version(uses).to_lowercase();
    let Some(owner) = owner_of(&name) else {
        return Vec::new();
    };
    let pinning = RefKind::of(uses.trim_end_matches('@'));

    if pinning.is_unpinned() {
        return vec![Finding::new(
            "untrusted_unpinned_action",
            Severity::High,
            format!("Untrusted action '{}' is not pinned to a version or commit", uses),
        )
        .evidence("action", name.as_str())
        .evidence("owner", owner)
        .evidence("pinning", serde_json::to_value(pinning).unwrap_or_default())
        .recommend("Pin the action to a full commit SHA after reviewing its source")];
    }

    let reason = suspicion(&name, owner);
    let severity = if reason.is_some() {
        Severity::High
    } else {
        Severity::Medium
    };
    vec![Finding::new(
        "untrusted_action",
        severity,
        format!("Action '{}' comes from an untrusted publisher '{}'", uses, owner),
    )
    .evidence("action", name.as_str())
    .evidence("owner", owner)
    .maybe_evidence("suspicion", reason)
    .recommend("Review the action's source, pin it to a full commit SHA, or add the publisher to trust.publishers")]
}

/// Structural typosquat shapes: the singular `action/` owner, or a name
/// ending in `action`.
fn structural_pattern(repository: &str, owner: &str) -> Option<String> {
    if owner == "action" {
        Some("owner is the singular 'action'".to_string())
    } else if repository.ends_with("-action") {
        Some(format!("'{}' ends in '-action'", repository))
    } else if repository.ends_with("action") {
        Some(format!("'{}' ends in 'action'", repository))
    } else if owner.ends_with("action") {
        Some(format!("owner '{}' mimics an action publisher name", owner))
    } else {
        None
    }
}

/// Known misspellings of popular actions, and names shaped like them.
///
/// Trusted owners are exempt from everything but the misspelling map.
pub fn check_typosquatting(uses: &str, ctx: &RuleContext) -> Vec<Finding> {
    let uses = uses.trim();
    if is_local_or_docker(uses) {
        return Vec::new();
    }
    let name = name_without_version(uses).to_lowercase();
    let Some(owner) = owner_of(&name) else {
        return Vec::new();
    };
    let repository: String = name.splitn(3, '/').take(2).collect::<Vec<_>>().join("/");

    if let Some((_, intended)) = TYPOSQUAT_MAP.iter().find(|(typo, _)| *typo == repository) {
        return vec![Finding::new(
            "typosquatting_action",
            Severity::High,
            format!("Action '{}' looks like a misspelling of '{}'", repository, intended),
        )
        .evidence("action", repository.as_str())
        .evidence("intended", *intended)
        .recommend(format!("Replace it with {}", intended))];
    }

    if ctx.trusted.owner_is_trusted(owner) {
        return Vec::new();
    }

    let mut findings = Vec::new();
    if let Some(pattern) = structural_pattern(&repository, owner) {
        findings.push(
            Finding::new(
                "suspicious_action_name",
                Severity::Medium,
                format!("Action '{}' has a name shaped like a typosquat", repository),
            )
            .evidence("action", repository.as_str())
            .evidence("pattern", pattern)
            .recommend("Confirm the publisher is the one you intended before using this action"),
        );
    }
    findings.extend(check_lookalike_publisher(&repository, owner, ctx));
    findings
}

/// Owners one or two edits away from a trusted publisher.
fn check_lookalike_publisher(repository: &str, owner: &str, ctx: &RuleContext) -> Option<Finding> {
    let trusted = ctx
        .trusted
        .prefixes()
        .iter()
        .map(|p| p.trim_end_matches('/'))
        .find(|trusted| {
            let distance = strsim::damerau_levenshtein(owner, trusted);
            trusted.len() >= 4 && (1..=2).contains(&distance)
        })?;
    Some(
        Finding::new(
            "lookalike_publisher",
            Severity::Medium,
            format!("Publisher '{}' is close to trusted publisher '{}'", owner, trusted),
        )
        .evidence("action", repository)
        .evidence("resembles", trusted)
        .recommend("Confirm the publisher is the one you intended before using this action"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrustedPublishers;

    fn ctx() -> RuleContext {
        RuleContext::default()
    }

    #[test]
    fn test_trusted_action_has_no_findings() {
        assert!(check_untrusted_action("actions/checkout@main", &ctx()).is_empty());
        assert!(check_untrusted_action("./local-action", &ctx()).is_empty());
        assert!(check_typosquatting("actions/checkout@v4", &ctx()).is_empty());
    }

    #[test]
    fn test_untrusted_unpinned() {
        let findings = check_untrusted_action("someone/tool@main", &ctx());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "untrusted_unpinned_action");
        assert_eq!(findings[0].severity, Severity::High);

        let missing = check_untrusted_action("someone/tool", &ctx());
        assert_eq!(missing[0].kind, "untrusted_unpinned_action");
    }

    #[test]
    fn test_untrusted_pinned_severity() {
        let plain = check_untrusted_action("someone/tool@v1.2.0", &ctx());
        assert_eq!(plain[0].kind, "untrusted_action");
        assert_eq!(plain[0].severity, Severity::Medium);

        let short_owner = check_untrusted_action("xy/tool@v1", &ctx());
        assert_eq!(short_owner[0].severity, Severity::High);

        let placeholder = check_untrusted_action("test/tool@v1", &ctx());
        assert_eq!(placeholder[0].severity, Severity::High);

        let separators = check_untrusted_action("someone/my--tool@v1", &ctx());
        assert_eq!(separators[0].severity, Severity::High);
    }

    #[test]
    fn test_custom_trust_list() {
        let trusted = TrustedPublishers::from_entries(&["someone"]).unwrap();
        let ctx = RuleContext::new(false, trusted);
        assert!(check_untrusted_action("someone/tool@main", &ctx).is_empty());
        assert_eq!(check_untrusted_action("actions/checkout@v4", &ctx).len(), 1);
    }

    #[test]
    fn test_known_misspelling() {
        let findings = check_typosquatting("actions/chekout@v4", &ctx());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "typosquatting_action");
        assert_eq!(findings[0].evidence_str("intended"), Some("actions/checkout"));
    }

    #[test]
    fn test_structural_patterns() {
        let singular = check_typosquatting("action/setup-rust@v1", &ctx());
        let kinds: Vec<&str> = singular.iter().map(|f| f.kind.as_str()).collect();
        assert_eq!(kinds, vec!["suspicious_action_name", "lookalike_publisher"]);

        let suffixed = check_typosquatting("someone/deploy-action@v1", &ctx());
        assert_eq!(suffixed.len(), 1);
        assert_eq!(suffixed[0].kind, "suspicious_action_name");
        assert_eq!(suffixed[0].severity, Severity::Medium);

        let joined = check_typosquatting("someone/deployaction@v1", &ctx());
        assert_eq!(joined[0].kind, "suspicious_action_name");

        assert!(check_typosquatting("dtolnay/rust-toolchain@stable", &ctx()).is_empty());
        assert!(check_typosquatting("docker/build-push-action@v5", &ctx()).is_empty());
    }

    #[test]
    fn test_lookalike_publisher_has_its_own_kind() {
        let near = check_typosquatting("dockerr/login@v1", &ctx());
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].kind, "lookalike_publisher");
        assert_eq!(near[0].evidence_str("resembles"), Some("docker"));
        assert!(near.iter().all(|f| f.kind != "suspicious_action_name"));
    }
}
