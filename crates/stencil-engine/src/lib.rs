//! Stencil Engine - manifest rendering for modules
//!
//! This crate provides a MiniJinja-based renderer with:
//! - Helm-compatible context names (`Values`, `Release`, `Chart`, `Capabilities`, `Files`)
//! - Kubernetes-oriented filters (toYaml, b64enc, nindent, etc.)
//! - Dependency rendering gated by `Chart.yaml` conditions
//! - A CRD path that emits a single custom resource
//! - Diagnostics pointing at the failing template line

pub mod engine;
pub mod error;
pub mod files;
pub mod filters;
pub mod functions;
pub mod renderer;

pub use engine::{Engine, EngineBuilder, RenderedTemplates};
pub use error::{EngineError, Result, TemplateError, TemplateErrorKind};
pub use renderer::RenderEngine;
