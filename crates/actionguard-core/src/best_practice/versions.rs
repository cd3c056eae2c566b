use crate::action_ref::{name_without_version, version_of, ActionReference, RefKind};
use crate::finding::{Finding, Severity};
use crate::parser::WorkflowDescriptor;
use crate::providers::ContentProvider;
use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

/// A SHA older than this relative to the latest release is outdated.
pub const STALE_COMMIT_DAYS: i64 = 365;

/// Majors at or below this are assumed stale when no latest version is known.
const FALLBACK_STALE_MAJOR: u64 = 2;

/// Numeric components of a `v1.2.3`-style tag. Pre-release suffixes after
/// `-` are ignored.
pub fn parse_version(tag: &str) -> Option<Vec<u64>> {
    let tag = tag.trim();
    let tag = tag.strip_prefix('v').unwrap_or(tag);
    let core = tag.split(['-', '+']).next()?;
    if core.is_empty() {
        return None;
    }
    core.split('.').map(|part| part.parse::<u64>().ok()).collect()
}

/// `current < latest` with missing components read as zero, so `v4` is
/// behind `v4.1.0` and equal to `v4.0.0`.
fn is_behind(current: &[u64], latest: &[u64]) -> bool {
    let width = current.len().max(latest.len());
    let pad = |v: &[u64]| {
        let mut v = v.to_vec();
        v.resize(width, 0);
        v
    };
    pad(current) < pad(latest)
}

fn outdated(reference: &ActionReference, message: String) -> Finding {
    Finding::new("outdated_action", Severity::Medium, message)
        .evidence("action", reference.name())
        .evidence("ref", reference.git_ref.as_str())
        .recommend("Update the action to its latest release and pin that release's commit SHA")
}

/// Flag references that lag behind the latest release.
///
/// SHA refs compare commit dates; version tags compare against the latest tag.
/// Without a provider, or when the tag lookup fails, majors `<= 2` are flagged
/// as a heuristic.
pub async fn check_older_version(
    reference: &ActionReference,
    provider: Option<&dyn ContentProvider>,
) -> Vec<Finding> {
    let git_ref = reference.git_ref.as_str();
    let kind = RefKind::classify(git_ref);

    if kind.is_sha() {
        let Some(provider) = provider else {
            return Vec::new();
        };
        return check_commit_age(reference, provider).await;
    }

    if kind != RefKind::Tag {
        return Vec::new();
    }
    let Some(current) = parse_version(git_ref) else {
        return Vec::new();
    };

    if let Some(provider) = provider {
        match provider.get_latest_tag(&reference.owner, &reference.repo).await {
            Ok(Some(latest_tag)) => {
                let Some(latest) = parse_version(&latest_tag) else {
                    return Vec::new();
                };
                if is_behind(&current, &latest) {
                    return vec![outdated(
                        reference,
                        format!(
                            "Action '{}' uses {} but {} is available",
                            reference.name(),
                            git_ref,
                            latest_tag
                        ),
                    )
                    .evidence("latest", latest_tag)];
                }
                return Vec::new();
            }
            Ok(None) => return Vec::new(),
            Err(e) => {
                debug!(action = %reference, error = %e, "latest tag lookup failed, using major-version heuristic");
            }
        }
    }

    match current.first() {
        Some(&major) if major <= FALLBACK_STALE_MAJOR => vec![outdated(
            reference,
            format!(
                "Action '{}' uses major version {}, which is likely outdated",
                reference.name(),
                major
            ),
        )
        .evidence("heuristic", true)],
        _ => Vec::new(),
    }
}

async fn check_commit_age(
    reference: &ActionReference,
    provider: &dyn ContentProvider,
) -> Vec<Finding> {
    let (owner, repo) = (&reference.owner, &reference.repo);
    let commit_date = match provider.get_commit_date(owner, repo, &reference.git_ref).await {
        Ok(Some(date)) => date,
        Ok(None) => return Vec::new(),
        Err(e) => {
            debug!(action = %reference, error = %e, "commit date lookup failed");
            return Vec::new();
        }
    };
    let (baseline, against) = match provider.get_latest_tag_commit_date(owner, repo).await {
        Ok(Some(date)) => (date, "the latest release"),
        Ok(None) => (Utc::now(), "today"),
        Err(e) => {
            debug!(action = %reference, error = %e, "latest tag date lookup failed");
            return Vec::new();
        }
    };

    let age = baseline - commit_date;
    if age <= Duration::days(STALE_COMMIT_DAYS) {
        return Vec::new();
    }
    vec![outdated(
        reference,
        format!(
            "Action '{}' is pinned to a commit {} days older than {}",
            reference.name(),
            age.num_days(),
            against
        ),
    )
    .evidence("commit_date", commit_date.to_rfc3339())
    .evidence("age_days", age.num_days())]
}

/// One finding per action used at more than one version across a
/// repository's workflows. Needs at least two workflows.
pub fn check_inconsistent_action_versions(
    workflows: &[(&str, &WorkflowDescriptor)],
) -> Vec<Finding> {
    if workflows.len() < 2 {
        return Vec::new();
    }

    let mut usage: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
    for &(file, workflow) in workflows {
        for uses in workflow.actions() {
            let Some(version) = version_of(&uses) else {
                continue;
            };
            let files = usage
                .entry(name_without_version(&uses).to_string())
                .or_default()
                .entry(version.to_string())
                .or_default();
            if !files.iter().any(|f| f == file) {
                files.push(file.to_string());
            }
        }
    }

    usage
        .into_iter()
        .filter(|(_, versions)| versions.len() > 1)
        .map(|(action, versions)| {
            let observed: Vec<_> = versions
                .iter()
                .flat_map(|(version, files)| {
                    files
                        .iter()
                        .map(move |file| json!({ "version": version, "workflow": file }))
                })
                .collect();
            let listed: Vec<&str> = versions.keys().map(String::as_str).collect();
            Finding::new(
                "inconsistent_action_versions",
                Severity::Low,
                format!(
                    "Action '{}' is used at {} different versions across workflows: {}",
                    action,
                    versions.len(),
                    listed.join(", ")
                ),
            )
            .evidence("action", action.as_str())
            .evidence("usages", observed)
            .recommend("Use the same pinned version of the action in every workflow")
        })
        .collect()
}
