//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Malformed template artifact: {message}")]
    MalformedArtifact {
        message: String,
        /// Remediation hint shown to the operator
        hint: Option<String>,
    },

    #[error("Invalid values schema: {message}")]
    InvalidSchema { message: String },

    #[error("Archive error: {message}")]
    Archive { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),

    #[error(transparent)]
    ValueLookup(#[from] ValueLookupError),
}

impl CoreError {
    /// Shorthand for a malformed artifact with a remediation hint
    pub fn malformed(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MalformedArtifact {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    /// Remediation hint, if the error carries one
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::MalformedArtifact { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }
}

/// Result of a failed dotted-path lookup into [`crate::Values`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueLookupError {
    #[error("value not found at '{path}'")]
    NotFound { path: String },

    #[error("value at '{path}' is {found}, expected {expected}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;
