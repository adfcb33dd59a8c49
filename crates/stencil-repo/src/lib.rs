//! Stencil template sources
//!
//! This crate turns a [`TemplateRef`](stencil_core::TemplateRef) into a
//! loaded [`Template`](stencil_core::Template):
//!
//! - **Git remotes**: refs listed with `ls-remote`, single-commit shallow fetch
//! - **Chart repositories**: Helm-style `index.yaml` plus `.tgz` archives
//! - **OCI registries**: Helm chart artifacts, with bearer token negotiation
//! - **CustomResourceDefinitions**: spec schema read from the cluster
//!
//! Dependencies declared in `Chart.yaml` are assembled recursively and every
//! artifact is served through an in-memory TTL cache keyed by strict version.
//!
//! ## Example
//!
//! ```rust,no_run
//! use stencil_core::{StencilConfig, TemplateRef};
//! use stencil_repo::{SourceContext, TemplateService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = TemplateService::new(SourceContext::new(StencilConfig::default()));
//!
//! let template_ref = TemplateRef {
//!     url: "https://charts.example.com".into(),
//!     path: "web".into(),
//!     version: "^1.0.0".into(),
//!     ..Default::default()
//! };
//! let template = service.get_template(&template_ref).await?;
//! println!("{} {:?}", template.name, template.version());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod crd;
pub mod credentials;
pub mod dependency;
pub mod error;
pub mod git;
pub mod http;
pub mod index;
pub mod loader;
pub mod oci;
pub mod service;
pub mod version;

pub use cache::{CacheKey, TemplateCache};
pub use crd::{CrdProvider, NoCrdProvider, template_from_crd};
pub use credentials::{Credentials, CredentialsResolver, EnvCredentials, NoCredentials, StaticCredentials};
pub use dependency::{DependencyAssembler, MAX_DEPENDENCY_DEPTH};
pub use error::{RepoError, Result};
pub use git::GitSource;
pub use http::HttpRepository;
pub use index::{ChartEntry, ChartIndex};
pub use loader::{ChartLoader, classify};
pub use oci::{OciReference, OciRegistry};
pub use service::{SourceContext, TemplateService};
pub use version::{RemoteRefs, SemverSpec, resolve_semver};
