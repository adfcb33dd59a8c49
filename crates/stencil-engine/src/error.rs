//! Render error types

use miette::{Diagnostic, NamedSource, SourceSpan};
use stencil_core::{CoreError, SchemaViolation};
use thiserror::Error;

/// Main render error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("values for chart '{chart}' violate values.schema.json:\n{}", format_violations(.violations))]
    SchemaViolation {
        chart: String,
        violations: Vec<SchemaViolation>,
    },

    #[error("template '{name}' was loaded from a CRD but carries no target kind")]
    MissingCrdTarget { name: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {}", v))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Error kind for categorizing template errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    UnknownFunction,
    SyntaxError,
    TypeError,
    InvalidOperation,
    Other,
}

/// Template-specific error with source information
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{template}: {message}")]
#[diagnostic(code(stencil::template::render))]
pub struct TemplateError {
    pub message: String,

    /// Template path relative to the chart root
    pub template: String,

    pub kind: TemplateErrorKind,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,

    #[help]
    pub help: Option<String>,
}

impl TemplateError {
    /// Create a template error from a MiniJinja error
    pub fn from_minijinja(err: minijinja::Error, template_name: &str, template_source: &str) -> Self {
        let kind = categorize(&err);
        let span = err
            .line()
            .and_then(|line| calculate_span(template_source, line));

        let message = match err.detail() {
            Some(detail) => format!("{}: {}", err.kind(), detail),
            None => err.kind().to_string(),
        };

        Self {
            message,
            template: template_name.to_string(),
            kind,
            src: NamedSource::new(template_name, template_source.to_string()),
            span,
            help: help_for(kind).map(String::from),
        }
    }

    pub fn kind(&self) -> TemplateErrorKind {
        self.kind
    }
}

fn categorize(err: &minijinja::Error) -> TemplateErrorKind {
    match err.kind() {
        minijinja::ErrorKind::UndefinedError => TemplateErrorKind::UndefinedVariable,
        minijinja::ErrorKind::UnknownFilter => TemplateErrorKind::UnknownFilter,
        minijinja::ErrorKind::UnknownFunction => TemplateErrorKind::UnknownFunction,
        minijinja::ErrorKind::SyntaxError => TemplateErrorKind::SyntaxError,
        minijinja::ErrorKind::InvalidOperation => TemplateErrorKind::InvalidOperation,
        minijinja::ErrorKind::NonPrimitive | minijinja::ErrorKind::NonKey => {
            TemplateErrorKind::TypeError
        }
        _ => TemplateErrorKind::Other,
    }
}

fn help_for(kind: TemplateErrorKind) -> Option<&'static str> {
    match kind {
        TemplateErrorKind::UndefinedVariable => Some(
            "check the module's values; use `| default(...)` for optional keys",
        ),
        TemplateErrorKind::UnknownFilter => Some(
            "available filters include toYaml, toJson, b64enc, quote, nindent, indent, required",
        ),
        TemplateErrorKind::SyntaxError => Some("templates use Jinja2 syntax: {{ expr }} and {% stmt %}"),
        _ => None,
    }
}

/// Calculate the source span for a given line number
fn calculate_span(source: &str, line_num: usize) -> Option<SourceSpan> {
    let mut offset = 0;

    for (idx, line) in source.lines().enumerate() {
        if idx + 1 == line_num {
            return Some(SourceSpan::new(offset.into(), line.len()));
        }
        offset += line.len() + 1;
    }

    None
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_span() {
        let src = "a: 1\nb: {{ oops }}\n";
        let span = calculate_span(src, 2).unwrap();
        assert_eq!(span.offset(), 5);
        assert_eq!(span.len(), 13);
        assert!(calculate_span(src, 9).is_none());
    }

    #[test]
    fn test_from_minijinja_syntax_error() {
        let env = minijinja::Environment::new();
        let err = env.template_from_str("{% if %}").unwrap_err();

        let template_error = TemplateError::from_minijinja(err, "templates/bad.yaml", "{% if %}");

        assert_eq!(template_error.kind(), TemplateErrorKind::SyntaxError);
        assert!(template_error.to_string().starts_with("templates/bad.yaml: "));
        assert!(template_error.help.is_some());
    }
}
