//! Stencil Core - data model for template-driven module reconciliation
//!
//! This crate provides the foundational types used throughout Stencil:
//! - `Module`: A deployed instantiation of a template with concrete values
//! - `TemplateRef`: The coordinate (repository, path, version, source type) of a template
//! - `Template`: A loaded, read-only template artifact and its dependencies
//! - `Values`: Configuration values with deep merge and checked accessors
//! - `FieldTree`: Typed schema tree shared by chart schemas and CRD specs
//! - `ChartFiles`: In-memory chart archives partitioned by role

pub mod archive;
pub mod chart;
pub mod config;
pub mod context;
pub mod error;
pub mod module;
pub mod resource;
pub mod schema;
pub mod template;
pub mod values;

pub use archive::{ChartFiles, FileMap, digest_matches, sha256_digest, unpack_chart_archive};
pub use chart::{ChartDependency, ChartMetadata, ChartType, condition_holds};
pub use config::StencilConfig;
pub use context::{Capabilities, ChartInfo, KubeVersion, ReleaseInfo};
pub use error::{CoreError, Result, ValueLookupError};
pub use module::{
    Module, ModuleSpec, ModuleStatus, ReconciliationState, ReconciliationStatus, ResourceRef,
    SourceType, TemplateRef,
};
pub use resource::{HealthStatus, ManagedResource, split_documents};
pub use schema::{FieldTree, FieldType, SchemaField, SchemaViolation, ValuesValidator};
pub use template::{CrdTarget, Template, TemplateDependency};
pub use values::Values;
