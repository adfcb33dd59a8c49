//! Error types for stencil-kube

use kube::core::ErrorResponse;
use stencil_core::{CoreError, ManagedResource};
use stencil_engine::EngineError;
use stencil_repo::RepoError;
use thiserror::Error;

/// Result type for stencil-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while reconciling a module
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Kind not served by the cluster
    #[error("cannot discover {kind}: {message}")]
    Discovery { kind: String, message: String },

    /// One or more objects failed to apply; the rest of the batch went through
    #[error("{} object(s) failed to apply:\n{}", .failures.len(), format_failures(.failures))]
    Apply { failures: Vec<ApplyFailure> },

    /// One or more objects could not be deleted
    #[error("{} object(s) failed to prune:\n{}", .failures.len(), format_failures(.failures))]
    Prune { failures: Vec<ApplyFailure> },

    /// Template source error
    #[error(transparent)]
    Source(#[from] RepoError),

    /// Rendering error
    #[error(transparent)]
    Render(#[from] EngineError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// Manifest document that isn't a Kubernetes object
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// An object the batch could not process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyFailure {
    pub resource: ManagedResource,
    pub message: String,
}

fn format_failures(failures: &[ApplyFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("  - {}: {}", f.resource, f.message))
        .collect::<Vec<_>>()
        .join("\n")
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }

    /// API status error as the apiserver would return it
    pub fn api_status(code: u16, reason: &str, message: impl Into<String>) -> Self {
        KubeError::Api(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: message.into(),
            reason: reason.to_string(),
            code,
        }))
    }
}
