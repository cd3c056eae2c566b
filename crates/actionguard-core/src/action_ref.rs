use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Ref used when a reference carries no `@` suffix.
pub const DEFAULT_REF: &str = "main";

static FULL_SHA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-f0-9]{40}$").expect("static regex"));
static SHORT_SHA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-f0-9]{7,39}$").expect("static regex"));
static HEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-f0-9]{7,}$").expect("static regex"));
static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+").expect("static regex"));

/// Raw result of splitting a reference string: `(owner, repo, ref, subdir)`.
///
/// Malformed input degrades to `(None, None, "main", None)`, which callers
/// treat as unresolvable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReference {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub git_ref: String,
    pub subdir: Option<String>,
}

impl ParsedReference {
    fn unresolvable() -> Self {
        Self {
            owner: None,
            repo: None,
            git_ref: DEFAULT_REF.to_string(),
            subdir: None,
        }
    }
}

/// Split `owner/repo[/subdir][@ref]` into its parts.
pub fn parse_action_reference(reference: &str) -> ParsedReference {
    let (path, git_ref) = match reference.rfind('@') {
        Some(idx) => (&reference[..idx], &reference[idx + 1..]),
        None => (reference, DEFAULT_REF),
    };

    let Some((owner, repo_path)) = path.split_once('/') else {
        return ParsedReference::unresolvable();
    };

    let (repo, subdir) = match repo_path.split_once('/') {
        Some((repo, subdir)) => (repo, Some(subdir)),
        None => (repo_path, None),
    };

    if owner.is_empty() || repo.is_empty() {
        return ParsedReference::unresolvable();
    }

    ParsedReference {
        owner: Some(owner.to_string()),
        repo: Some(repo.to_string()),
        git_ref: git_ref.to_string(),
        subdir: subdir.filter(|s| !s.is_empty()).map(String::from),
    }
}

/// A resolvable reference to a reusable action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionReference {
    pub owner: String,
    pub repo: String,
    pub git_ref: String,
    pub subdir: Option<String>,
}

impl ActionReference {
    pub fn parse(reference: &str) -> Option<Self> {
        let parsed = parse_action_reference(reference);
        Some(Self {
            owner: parsed.owner?,
            repo: parsed.repo?,
            git_ref: parsed.git_ref,
            subdir: parsed.subdir,
        })
    }

    /// `owner/repo[/subdir]` without the version.
    pub fn name(&self) -> String {
        match &self.subdir {
            Some(subdir) => format!("{}/{}/{}", self.owner, self.repo, subdir),
            None => format!("{}/{}", self.owner, self.repo),
        }
    }

    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Join a path onto the action's subdirectory.
    pub fn path_in_action(&self, file: &str) -> String {
        match &self.subdir {
            Some(subdir) => format!("{}/{}", subdir.trim_end_matches('/'), file),
            None => file.to_string(),
        }
    }

    /// True when the subdir points at a workflow file rather than an action.
    pub fn points_at_workflow(&self) -> bool {
        self.subdir.as_deref().is_some_and(is_workflow_path)
    }
}

impl fmt::Display for ActionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name(), self.git_ref)
    }
}

/// How a `uses:` reference is pinned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    /// 40 hex characters.
    FullSha,
    /// 7-39 hex characters.
    ShortSha,
    /// Over 40 hex characters: SHA-shaped, but no commit id.
    LongHex,
    /// `v`-prefixed or `N.N` shaped.
    Tag,
    /// Anything else, usually a branch name.
    Branch,
    /// No `@` at all.
    Missing,
}

impl RefKind {
    pub fn of(uses: &str) -> Self {
        match uses.rfind('@') {
            Some(idx) => Self::classify(&uses[idx + 1..]),
            None => RefKind::Missing,
        }
    }

    pub fn classify(git_ref: &str) -> Self {
        if FULL_SHA_RE.is_match(git_ref) {
            RefKind::FullSha
        } else if SHORT_SHA_RE.is_match(git_ref) {
            RefKind::ShortSha
        } else if HEX_RE.is_match(git_ref) {
            RefKind::LongHex
        } else if looks_like_tag(git_ref) {
            RefKind::Tag
        } else {
            RefKind::Branch
        }
    }

    /// Hex-shaped refs of at least seven characters.
    pub fn is_sha(&self) -> bool {
        matches!(self, RefKind::FullSha | RefKind::ShortSha | RefKind::LongHex)
    }

    /// Branch-shaped or missing: nothing stops the ref from moving.
    pub fn is_unpinned(&self) -> bool {
        matches!(self, RefKind::Branch | RefKind::Missing)
    }
}

fn looks_like_tag(git_ref: &str) -> bool {
    git_ref.starts_with('v') || VERSION_RE.is_match(git_ref)
}

/// Paths under `.github/workflows`, or YAML files, are workflow calls.
pub fn is_workflow_path(path: &str) -> bool {
    path.contains(".github/workflows")
        || path.ends_with(".yml")
        || path.ends_with(".yaml")
}

/// Strip the `@ref` suffix from a `uses:` value.
pub fn name_without_version(uses: &str) -> &str {
    match uses.rfind('@') {
        Some(idx) => &uses[..idx],
        None => uses,
    }
}

/// The `@ref` suffix of a `uses:` value, if any.
pub fn version_of(uses: &str) -> Option<&str> {
    uses.rfind('@').map(|idx| &uses[idx + 1..])
}

/// Parse a strict `owner/repo` string.
pub fn parse_repository(input: &str) -> Option<(String, String)> {
    let input = input.trim().trim_end_matches('/');
    let (owner, repo) = input.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') || input.contains('@') {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}
