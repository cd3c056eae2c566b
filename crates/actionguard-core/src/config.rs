use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "actionguard.toml";
pub const CONFIG_ENV_VAR: &str = "ACTIONGUARD_CONFIG";

/// Publishers whose actions are trusted when no list is configured.
pub const DEFAULT_TRUSTED_PUBLISHERS: &[&str] = &[
    "actions/",
    "github/",
    "microsoft/",
    "azure/",
    "aws-actions/",
    "google-github-actions/",
    "docker/",
    "hashicorp/",
    "gradle/",
    "ruby/",
    "dependabot/",
    "codecov/",
    "slsa-framework/",
    "sigstore/",
    "ossf/",
];

/// Where a trusted-publisher list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustSource {
    Configured,
    /// No list was configured.
    Default,
    /// A list was configured but was unusable.
    DefaultAfterInvalid,
}

/// Allow-list of publisher prefixes, each ending in `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedPublishers {
    prefixes: Vec<String>,
}

impl Default for TrustedPublishers {
    fn default() -> Self {
        Self {
            prefixes: DEFAULT_TRUSTED_PUBLISHERS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl TrustedPublishers {
    /// Normalise entries; `None` when nothing usable remains.
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Option<Self> {
        let mut prefixes: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry.as_ref().trim().to_lowercase();
            if entry.is_empty() {
                continue;
            }
            let prefix = if entry.ends_with('/') {
                entry
            } else {
                format!("{entry}/")
            };
            if !prefixes.contains(&prefix) {
                prefixes.push(prefix);
            }
        }
        (!prefixes.is_empty()).then_some(Self { prefixes })
    }

    /// Build from the raw `trust.publishers` config value, falling back to the
    /// built-in list when it is absent or unusable.
    pub fn from_config_value(value: Option<&toml::Value>) -> (Self, TrustSource) {
        let Some(value) = value else {
            return (Self::default(), TrustSource::Default);
        };
        let entries: Option<Vec<&str>> = value
            .as_array()
            .and_then(|items| items.iter().map(|v| v.as_str()).collect());
        match entries.as_deref().and_then(Self::from_entries) {
            Some(trusted) => (trusted, TrustSource::Configured),
            None => (Self::default(), TrustSource::DefaultAfterInvalid),
        }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// True when `action` (`owner/repo...`, optionally versioned) starts with a
    /// trusted prefix.
    pub fn is_trusted(&self, action: &str) -> bool {
        let action = action.trim().to_lowercase();
        self.prefixes.iter().any(|p| action.starts_with(p.as_str()))
    }

    pub fn owner_is_trusted(&self, owner: &str) -> bool {
        self.is_trusted(&format!("{}/", owner))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub max_depth: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { max_depth: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_url: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneConfig {
    /// Cache directory for clones; a temporary directory when unset.
    pub dir: Option<PathBuf>,
    pub remote: String,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            dir: None,
            remote: "https://github.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretScannerConfig {
    pub enabled: bool,
    pub binary: String,
    pub timeout_secs: u64,
}

impl Default for SecretScannerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            binary: "trufflehog".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".actionguard/analyses"),
        }
    }
}

/// Complete auditor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub resolver: ResolverConfig,
    pub github: GitHubConfig,
    pub clone: CloneConfig,
    pub secret_scanner: SecretScannerConfig,
    pub store: StoreConfig,
    #[serde(skip)]
    pub trusted: TrustedPublishers,
}

impl Config {
    /// Parse TOML text. Invalid TOML is an error; an unusable publisher list
    /// only downgrades to the defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut table: toml::Table = toml::from_str(content).context("Failed to parse config")?;
        let trust = table.remove("trust");
        let publishers = trust.as_ref().and_then(|t| t.get("publishers"));

        let mut config: Config = toml::Value::Table(table)
            .try_into()
            .context("Invalid config values")?;

        let (trusted, source) = TrustedPublishers::from_config_value(publishers);
        match source {
            TrustSource::Configured => {
                debug!(count = trusted.prefixes().len(), "loaded trusted publishers")
            }
            TrustSource::Default => debug!("no trusted publishers configured, using defaults"),
            TrustSource::DefaultAfterInvalid => warn!(
                "trust.publishers is not a non-empty list of strings; using built-in defaults"
            ),
        }
        config.trusted = trusted;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to load config file '{}'", path.display()))
    }

    /// Load from an explicit path, `$ACTIONGUARD_CONFIG`, or `./actionguard.toml`,
    /// in that order; defaults when none exists.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load(Path::new(&path));
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.is_file() {
            return Self::load(local);
        }
        debug!("no config file found, using defaults");
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_entries_normalised() {
        let trusted = TrustedPublishers::from_entries(&["my-org", " Other/ ", "", "my-org/"]).unwrap();
        assert_eq!(trusted.prefixes(), &["my-org/".to_string(), "other/".to_string()]);
        assert!(trusted.is_trusted("my-org/deploy@v1"));
        assert!(trusted.is_trusted("OTHER/thing@main"));
        assert!(!trusted.is_trusted("my-org-fork/deploy@v1"));
    }

    #[test]
    fn test_blank_entries_fall_back() {
        assert!(TrustedPublishers::from_entries(&["", "  "]).is_none());
    }

    #[test]
    fn test_defaults_trust_official_publishers() {
        let trusted = TrustedPublishers::default();
        assert!(trusted.is_trusted("actions/checkout@v4"));
        assert!(trusted.owner_is_trusted("github"));
        assert!(!trusted.is_trusted("random-dev/checkout@v4"));
    }

    #[test]
    fn test_config_publishers_configured() {
        let config = Config::from_toml("[trust]\npublishers = [\"acme\"]\n").unwrap();
        assert_eq!(config.trusted.prefixes(), &["acme/".to_string()]);
    }

    #[test]
    fn test_malformed_publishers_use_defaults() {
        for toml in [
            "[trust]\npublishers = \"acme\"\n",
            "[trust]\npublishers = []\n",
            "[trust]\npublishers = [1, 2]\n",
            "[trust]\npublishers = [\"\"]\n",
        ] {
            let config = Config::from_toml(toml).unwrap();
            assert_eq!(config.trusted, TrustedPublishers::default(), "{toml}");
        }
        let (_, source) =
            TrustedPublishers::from_config_value(Some(&toml::Value::String("x".into())));
        assert_eq!(source, TrustSource::DefaultAfterInvalid);
        let (_, source) = TrustedPublishers::from_config_value(None);
        assert_eq!(source, TrustSource::Default);
    }

    #[test]
    fn test_sections_with_defaults() {
        let config = Config::from_toml("[resolver]\nmax_depth = 3\n").unwrap();
        assert_eq!(config.resolver.max_depth, 3);
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert!(!config.secret_scanner.enabled);
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(Config::from_toml("[resolver\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[secret_scanner]\nenabled = true\ntimeout_secs = 5").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert!(config.secret_scanner.enabled);
        assert_eq!(config.secret_scanner.timeout_secs, 5);
    }
}
