use thiserror::Error;

/// Failure reported by a [`ContentProvider`](crate::providers::ContentProvider).
///
/// Only [`ProviderError::NotFound`] is a verdict about the remote content;
/// every other variant means "could not determine" and must never be turned
/// into a security finding.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected response ({status}): {message}")]
    Unexpected { status: u16, message: String },

    #[error("git error: {0}")]
    Git(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        !self.is_not_found()
    }
}

/// Malformed YAML. Returned instead of a descriptor so callers can tell a
/// broken file apart from a valid-but-empty one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid YAML: {0}")]
    Yaml(String),
}

/// Errors surfaced to the caller of an audit entry point.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("analysis '{0}' not found")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
