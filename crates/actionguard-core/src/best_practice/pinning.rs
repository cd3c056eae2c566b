use crate::action_ref::{name_without_version, version_of, RefKind};
use crate::finding::{Finding, Severity};
use crate::parser::{walk_uses, WorkflowDescriptor};
use crate::rules::RuleContext;

/// Classify a single `uses:` reference.
///
/// SHA-shaped and tag-shaped refs are accepted; a missing ref or anything
/// branch-like is `unpinned_version`.
pub fn check_pinned_version(uses: &str) -> Vec<Finding> {
    let name = name_without_version(uses);
    match RefKind::of(uses) {
        RefKind::Missing => vec![Finding::new(
            "unpinned_version",
            Severity::High,
            format!("Action '{}' is used without any version pin", name),
        )
        .evidence("action", name)
        .recommend("Pin the action to a full commit SHA, e.g. `owner/repo@<40-char sha>`")],
        RefKind::Branch => {
            let git_ref = version_of(uses).unwrap_or_default();
            vec![Finding::new(
                "unpinned_version",
                Severity::High,
                format!(
                    "Action '{}' is pinned to '{}', which looks like a branch and can change at any time",
                    name, git_ref
                ),
            )
            .evidence("action", name)
            .evidence("ref", git_ref)
            .recommend("Pin the action to a full commit SHA instead of a branch")]
        }
        RefKind::FullSha | RefKind::ShortSha | RefKind::LongHex | RefKind::Tag => Vec::new(),
    }
}

/// Remote `uses:` values in a workflow, deduplicated, including reusable
/// workflow calls. Local paths and `docker://` images are skipped.
fn remote_uses(workflow: &WorkflowDescriptor) -> Vec<&str> {
    let mut seen: Vec<&str> = Vec::new();
    walk_uses(&workflow.raw, &mut |uses| {
        let uses = uses.trim();
        if uses.starts_with("./") || uses.starts_with("docker://") || !uses.contains('/') {
            return;
        }
        if !seen.contains(&uses) {
            seen.push(uses);
        }
    });
    seen
}

pub fn check_workflow_pinned_versions(
    workflow: &WorkflowDescriptor,
    _ctx: &RuleContext,
) -> Vec<Finding> {
    remote_uses(workflow)
        .into_iter()
        .flat_map(check_pinned_version)
        .collect()
}

/// Strength of SHA pinning for every remote `uses:`. Branch-shaped refs are
/// left to [`check_pinned_version`].
pub fn check_hash_pinning(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    let mut findings = Vec::new();
    for uses in remote_uses(workflow) {
        let name = name_without_version(uses);
        let Some(git_ref) = version_of(uses) else {
            continue;
        };
        match RefKind::classify(git_ref) {
            RefKind::ShortSha => findings.push(
                Finding::new(
                    "short_hash_pinning",
                    Severity::Low,
                    format!(
                        "Action '{}' is pinned to a short SHA '{}'; short SHAs can collide",
                        name, git_ref
                    ),
                )
                .evidence("action", name)
                .evidence("ref", git_ref)
                .recommend("Use the full 40-character commit SHA"),
            ),
            RefKind::Tag => findings.push(
                Finding::new(
                    "tag_pinning",
                    Severity::Medium,
                    format!(
                        "Action '{}' is pinned to tag '{}'; tags are mutable and can be moved",
                        name, git_ref
                    ),
                )
                .evidence("action", name)
                .evidence("ref", git_ref)
                .recommend(format!(
                    "Pin to the commit SHA the tag points at: `{}@<sha> # {}`",
                    name, git_ref
                )),
            ),
            _ => {}
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_workflow;

    #[test]
    fn test_missing_pin_is_high() {
        let findings = check_pinned_version("actions/checkout");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "unpinned_version");
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn test_pinning_classification_is_total() {
        let cases = [
            ("actions/checkout@a5ac7e51b41094c92402da3b24376905380afc29", false),
            ("actions/checkout@8f4b7f8", false),
            ("actions/checkout@v4", false),
            ("actions/checkout@4.1.0", false),
            ("actions/checkout@main", true),
            ("actions/checkout@release/v1", true),
            ("actions/checkout@", true),
            ("actions/checkout", true),
        ];
        for (uses, flagged) in cases {
            assert_eq!(!check_pinned_version(uses).is_empty(), flagged, "{uses}");
        }
    }

    #[test]
    fn test_hash_pinning_strength() {
        let yaml = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@8f4b7f8
      - uses: actions/setup-node@v4
      - uses: actions/cache@a5ac7e51b41094c92402da3b24376905380afc29
      - uses: actions/upload-artifact@main
      - uses: ./local
  shared:
    uses: org/repo/.github/workflows/ci.yml@v1
"#;
        let wf = parse_workflow(yaml).unwrap();
        let findings = check_hash_pinning(&wf, &RuleContext::default());
        let kinds: Vec<_> = findings.iter().map(|f| f.kind.as_str()).collect();
        assert_eq!(kinds, vec!["short_hash_pinning", "tag_pinning", "tag_pinning"]);
        assert_eq!(findings[0].severity, Severity::Low);
        assert_eq!(findings[1].severity, Severity::Medium);
    }

    #[test]
    fn test_short_sha_not_unpinned() {
        assert!(check_pinned_version("actions/checkout@8f4b7f8").is_empty());
        let wf = parse_workflow(
            "on: push\njobs:\n  a:\n    steps:\n      - uses: actions/checkout@8f4b7f8\n",
        )
        .unwrap();
        let findings = check_hash_pinning(&wf, &RuleContext::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "short_hash_pinning");
    }

    #[test]
    fn test_overlong_hex_is_not_a_short_sha() {
        let overlong = "actions/checkout@a5ac7e51b41094c92402da3b24376905380afc29f";
        assert!(check_pinned_version(overlong).is_empty());
        let wf = parse_workflow(&format!(
            "on: push\njobs:\n  a:\n    steps:\n      - uses: {}\n      - uses: actions/cache@a5ac7e51b41094c92402da3b24376905380afc2\n",
            overlong
        ))
        .unwrap();
        let findings = check_hash_pinning(&wf, &RuleContext::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "short_hash_pinning");
        assert_eq!(findings[0].evidence_str("action"), Some("actions/cache"));
    }

    #[test]
    fn test_workflow_pinned_versions() {
        let wf = parse_workflow(
            "on: push\njobs:\n  a:\n    steps:\n      - uses: actions/checkout@main\n      - uses: actions/checkout@main\n      - uses: actions/cache\n",
        )
        .unwrap();
        let findings = check_workflow_pinned_versions(&wf, &RuleContext::default());
        assert_eq!(findings.len(), 2);
    }
}
