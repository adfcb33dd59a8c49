//! Error types for template source operations

use stencil_core::CoreError;
use thiserror::Error;

/// Template source errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Reachability ============
    #[error("Source unreachable: {url} - {message}")]
    SourceUnreachable { url: String, message: String },

    #[error("HTTP error: {status} from {url}")]
    HttpError { status: u16, url: String },

    #[error("Authentication required for {url}")]
    AuthRequired { url: String },

    #[error("Git command failed: git {operation}: {stderr}")]
    GitCommand { operation: String, stderr: String },

    // ============ Artifacts ============
    #[error("Malformed artifact at {location}: {message}")]
    MalformedArtifact {
        location: String,
        message: String,
        hint: Option<String>,
    },

    #[error("Invalid index at {url}: {message}")]
    InvalidIndex { url: String, message: String },

    #[error("Invalid OCI reference: {reference}")]
    InvalidOciReference { reference: String },

    #[error("Integrity check failed for {name}: expected {expected}, got {actual}")]
    IntegrityCheckFailed {
        name: String,
        expected: String,
        actual: String,
    },

    // ============ Versions ============
    #[error("Version not found: {name}@{spec} in {repo} (available: {available})")]
    VersionNotFound {
        name: String,
        spec: String,
        repo: String,
        available: String,
    },

    // ============ Dependencies ============
    #[error("Dependency resolution failed for {chart}: {message}")]
    DependencyResolution { chart: String, message: String },

    // ============ Cluster ============
    #[error("Discovery failed for {name}: {message}")]
    Discovery { name: String, message: String },

    // ============ Other ============
    #[error(transparent)]
    Core(CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for template source operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl RepoError {
    /// Attach the artifact location to a core error
    pub fn from_core(err: CoreError, location: &str) -> Self {
        match err {
            CoreError::MalformedArtifact { message, hint } => RepoError::MalformedArtifact {
                location: location.to_string(),
                message,
                hint,
            },
            CoreError::Archive { message } => RepoError::MalformedArtifact {
                location: location.to_string(),
                message,
                hint: None,
            },
            other => RepoError::Core(other),
        }
    }

    /// Remediation hint, when one is known
    pub fn hint(&self) -> Option<&str> {
        match self {
            RepoError::MalformedArtifact { hint, .. } => hint.as_deref(),
            RepoError::AuthRequired { .. } => {
                Some("set STENCIL_REPO_USERNAME and STENCIL_REPO_PASSWORD for this repository")
            }
            RepoError::Core(core) => core.hint(),
            _ => None,
        }
    }

    /// Whether the source could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            RepoError::SourceUnreachable { .. }
                | RepoError::HttpError { .. }
                | RepoError::AuthRequired { .. }
                | RepoError::GitCommand { .. }
        )
    }
}

impl From<CoreError> for RepoError {
    fn from(e: CoreError) -> Self {
        RepoError::Core(e)
    }
}

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        let url = e.url().map(|u| u.to_string()).unwrap_or_default();
        if let Some(status) = e.status() {
            RepoError::HttpError {
                status: status.as_u16(),
                url,
            }
        } else {
            RepoError::SourceUnreachable {
                url,
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(e: serde_json::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for RepoError {
    fn from(e: url::ParseError) -> Self {
        RepoError::SourceUnreachable {
            url: String::new(),
            message: format!("invalid URL: {}", e),
        }
    }
}
