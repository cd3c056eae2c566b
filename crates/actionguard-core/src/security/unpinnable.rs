//! Actions that stay mutable even when the `uses:` ref is pinned: registry
//! images behind tags, unpinned base images, package installs and downloads
//! without integrity checks, and composite sub-steps on moving refs.

use crate::action_ref::RefKind;
use crate::finding::{Finding, Severity};
use crate::parser::WorkflowDescriptor;
use crate::rules::{ActionSubject, RuleContext};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Lines either side of a download that may carry its checksum verification.
const INTEGRITY_WINDOW: usize = 3;
const MAX_EVIDENCE_LINES: usize = 10;

static FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*FROM\s+(?:--\S+\s+)*(\S+)(?:\s+AS\s+(\S+))?").expect("static regex")
});

static PIP_INSTALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bpip3?\s+install\b").expect("static regex"));

static NPM_INSTALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bnpm\s+(?:install|i|add)\b(.*)").expect("static regex"));

static DOWNLOAD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(curl|wget)\b[^\n]*https?://").expect("static regex"));

static CHECKSUM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)sha256|sha512|sha1sum|md5|checksum|gpg\s+--verify|cosign\s+verify")
        .expect("static regex")
});

static JS_FETCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\bfetch\(|\bhttps?\.(get|request)\(|\baxios(\.\w+)?\(|\brequire\(['\x22](node-fetch|request|got)['\x22]\)|\bdownloadTool\(|\bexec\(['\x22](curl|wget)",
    )
    .expect("static regex")
});

static JS_INTEGRITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)integrity|createHash|sha256|sha512|checksum|verifySignature")
        .expect("static regex")
});

fn is_digest_pinned(image: &str) -> bool {
    image.contains("@sha256:")
}

/// True when a line within `window` of `index` matches `re`.
fn near(lines: &[&str], index: usize, window: usize, re: &Regex) -> bool {
    let start = index.saturating_sub(window);
    let end = (index + window + 1).min(lines.len());
    lines[start..end].iter().any(|l| re.is_match(l))
}

fn unpinned_pip(line: &str) -> bool {
    PIP_INSTALL_RE.is_match(line)
        && !line.contains("==")
        && !line.contains("--require-hashes")
        && !line.contains(" -r ")
}

/// `npm install <pkg>` where some package lacks an `@version`. A bare
/// `npm install` installs from the lockfile.
fn unpinned_npm(line: &str) -> bool {
    let Some(caps) = NPM_INSTALL_RE.captures(line) else {
        return false;
    };
    caps.get(1)
        .map(|args| args.as_str())
        .unwrap_or_default()
        .split_whitespace()
        .take_while(|t| !matches!(*t, "&&" | "||" | ";" | "|"))
        .filter(|t| !t.starts_with('-') && !t.starts_with('.') && !t.starts_with('/'))
        .any(|pkg| !pkg.trim_start_matches('@').contains('@'))
}

/// Package installs and downloads in shell text (Dockerfile or `run:`).
fn scan_build_text(text: &str, source: &str, action: &str) -> Vec<Finding> {
    let lines: Vec<&str> = text.lines().collect();
    let mut findings = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            continue;
        }
        if unpinned_pip(trimmed) || unpinned_npm(trimmed) {
            findings.push(
                Finding::new(
                    "unpinned_package_install",
                    Severity::High,
                    format!("{} in {} installs packages without pinned versions", action, source),
                )
                .evidence("action", action)
                .evidence("source", source)
                .evidence("line", i + 1)
                .evidence("command", trimmed)
                .recommend("Pin every package to an exact version, ideally with hashes"),
            );
        }
        if DOWNLOAD_RE.is_match(trimmed) && !near(&lines, i, INTEGRITY_WINDOW, &CHECKSUM_RE) {
            findings.push(
                Finding::new(
                    "unverified_download",
                    Severity::High,
                    format!("{} in {} downloads a file without verifying a checksum", action, source),
                )
                .evidence("action", action)
                .evidence("source", source)
                .evidence("line", i + 1)
                .evidence("command", trimmed)
                .recommend("Verify downloads against a published sha256 before using them"),
            );
        }
    }
    findings
}

fn unpinned_image_finding(image: &str, action: &str) -> Finding {
    Finding::new(
        "unpinned_docker_image",
        Severity::High,
        format!("{} runs container image '{}' by a mutable tag", action, image),
    )
    .evidence("image", image)
    .recommend("Reference the image by digest: image@sha256:<digest>")
}

/// `uses: docker://...` steps in a workflow.
pub fn check_docker_steps(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    workflow
        .steps()
        .filter_map(|(job, step)| {
            let image = step.uses.as_deref()?.strip_prefix("docker://")?;
            (!is_digest_pinned(image)).then(|| {
                unpinned_image_finding(image, &format!("Step '{}'", step.label()))
                    .located(&job.id, Some(&step.label()))
            })
        })
        .collect()
}

fn dockerfile_base_images(dockerfile: &str, action: &str) -> Vec<Finding> {
    let mut stages: HashSet<String> = HashSet::new();
    let mut findings = Vec::new();
    for (i, line) in dockerfile.lines().enumerate() {
        let Some(caps) = FROM_RE.captures(line) else {
            continue;
        };
        let image = &caps[1];
        let lowered = image.to_lowercase();
        if lowered != "scratch"
            && !image.contains('$')
            && !stages.contains(&lowered)
            && !is_digest_pinned(image)
        {
            findings.push(
                Finding::new(
                    "unpinned_base_image",
                    Severity::Medium,
                    format!("{} builds FROM '{}' without a digest", action, image),
                )
                .evidence("action", action)
                .evidence("image", image)
                .evidence("line", i + 1)
                .recommend("Pin base images by digest: FROM image@sha256:<digest>"),
            );
        }
        if let Some(alias) = caps.get(2) {
            stages.insert(alias.as_str().to_lowercase());
        }
    }
    findings
}

pub fn check_docker_action(subject: &ActionSubject<'_>) -> Vec<Finding> {
    let Some(metadata) = subject.metadata.filter(|m| m.is_docker()) else {
        return Vec::new();
    };
    let action = subject.reference.to_string();
    let mut findings = Vec::new();

    if let Some(image) = metadata
        .runs
        .image
        .as_deref()
        .and_then(|i| i.trim().strip_prefix("docker://"))
    {
        if !is_digest_pinned(image) {
            findings.push(unpinned_image_finding(image, &action).evidence("action", action.as_str()));
        }
    }

    if let Some(dockerfile) = subject.dockerfile {
        findings.extend(dockerfile_base_images(dockerfile, &action));
        findings.extend(scan_build_text(dockerfile, "Dockerfile", &action));
    }
    findings
}

pub fn check_composite_action(subject: &ActionSubject<'_>) -> Vec<Finding> {
    let Some(metadata) = subject.metadata.filter(|m| m.is_composite()) else {
        return Vec::new();
    };
    let action = subject.reference.to_string();
    let mut findings = Vec::new();

    for step in &metadata.runs.steps {
        if let Some(uses) = step.uses.as_deref() {
            let pinned = if let Some(image) = uses.strip_prefix("docker://") {
                is_digest_pinned(image)
            } else {
                uses.starts_with("./") || RefKind::of(uses).is_sha()
            };
            if !pinned {
                findings.push(
                    Finding::new(
                        "unpinned_composite_dependency",
                        Severity::High,
                        format!("{} uses '{}' without pinning it to a commit", action, uses),
                    )
                    .evidence("action", action.as_str())
                    .evidence("step", step.label())
                    .evidence("uses", uses)
                    .recommend("Pin nested actions to full commit SHAs; callers cannot pin them for you"),
                );
            }
        }
        if let Some(run) = step.run.as_deref() {
            findings.extend(scan_build_text(run, &format!("step '{}'", step.label()), &action));
        }
    }
    findings
}

pub fn check_javascript_action(subject: &ActionSubject<'_>) -> Vec<Finding> {
    let is_javascript = subject
        .metadata
        .is_some_and(|m| m.runs.using.is_javascript());
    let Some(script) = subject.script.filter(|_| is_javascript) else {
        return Vec::new();
    };
    let lines: Vec<&str> = script.lines().collect();
    let unverified: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(i, line)| {
            JS_FETCH_RE.is_match(line) && !near(&lines, *i, INTEGRITY_WINDOW, &JS_INTEGRITY_RE)
        })
        .map(|(i, _)| i + 1)
        .collect();
    if unverified.is_empty() {
        return Vec::new();
    }

    let action = subject.reference.to_string();
    vec![Finding::new(
        "unverified_remote_fetch",
        Severity::High,
        format!(
            "{} fetches remote content at runtime without an integrity check ({} location(s))",
            action,
            unverified.len()
        ),
    )
    .evidence("action", action.as_str())
    .evidence(
        "lines",
        unverified.into_iter().take(MAX_EVIDENCE_LINES).collect::<Vec<_>>(),
    )
    .recommend("Bundle dependencies at build time or verify fetched content against a known hash")]
}
