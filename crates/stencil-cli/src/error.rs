//! CLI error types with exit code handling

use miette::Diagnostic;
use thiserror::Error;

use stencil_core::CoreError;
use stencil_engine::{EngineError, TemplateError};
use stencil_kube::KubeError;
use stencil_repo::RepoError;

use crate::exit_codes;

/// CLI error type carrying its exit code class
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Module file, config or values could not be read
    #[error("Invalid input: {message}")]
    #[diagnostic(code(stencil::cli::input))]
    Input {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Template resolution or fetching failed
    #[error("Template source error: {0}")]
    #[diagnostic(code(stencil::cli::source))]
    Source(RepoError),

    /// A template failed to render, with its source location
    #[error(transparent)]
    #[diagnostic(transparent)]
    Template(TemplateError),

    /// Rendering failed outside a template (schema, values)
    #[error("Render error: {message}")]
    #[diagnostic(code(stencil::cli::render))]
    Render { message: String },

    /// Cluster request failed
    #[error("Cluster error: {message}")]
    #[diagnostic(code(stencil::cli::cluster), help("check the current kube context with `kubectl config current-context`"))]
    Cluster { message: String },

    /// Objects were rejected while applying or pruning
    #[error("{message}")]
    #[diagnostic(code(stencil::cli::apply))]
    Apply { message: String },

    /// Anything else
    #[error("{message}")]
    #[diagnostic(code(stencil::cli::error))]
    Other { message: String },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Input { .. } => exit_codes::INPUT_ERROR,
            Self::Source(_) => exit_codes::SOURCE_ERROR,
            Self::Template(_) | Self::Render { .. } => exit_codes::TEMPLATE_ERROR,
            Self::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            Self::Apply { .. } => exit_codes::APPLY_ERROR,
            Self::Other { .. } => exit_codes::ERROR,
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
            help: None,
        }
    }

    pub fn input_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        Self::input(err.to_string())
    }
}

impl From<RepoError> for CliError {
    fn from(err: RepoError) -> Self {
        Self::Source(err)
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Template(e) => Self::Template(e),
            other => Self::Render {
                message: other.to_string(),
            },
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        match err {
            KubeError::Source(e) => Self::Source(e),
            KubeError::Render(e) => e.into(),
            KubeError::Core(e) => e.into(),
            rejected @ (KubeError::Apply { .. } | KubeError::Prune { .. } | KubeError::InvalidManifest(_)) => {
                Self::Apply {
                    message: rejected.to_string(),
                }
            }
            cluster @ (KubeError::Api(_) | KubeError::Discovery { .. }) => Self::Cluster {
                message: cluster.to_string(),
            },
            other => Self::Other {
                message: other.to_string(),
            },
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Other {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
