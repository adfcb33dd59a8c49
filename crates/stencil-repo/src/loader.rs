//! Chart loaders
//!
//! One variant per source type. A loader resolves a floating version spec to
//! a strict version and loads the artifact for a strict version; chart
//! sources hand their files to the [`DependencyAssembler`].

use std::sync::Arc;

use stencil_core::{ChartFiles, SourceType, Template, TemplateRef};

use crate::crd::{CrdProvider, preferred_version, template_from_crd};
use crate::dependency::DependencyAssembler;
use crate::error::{RepoError, Result};
use crate::git::{GitSource, looks_like_git};
use crate::http::HttpRepository;
use crate::oci::{OciReference, OciRegistry};
use crate::service::SourceContext;
use crate::version::{SemverSpec, describe_candidates, resolve_semver};

/// Source-specific loader
pub enum ChartLoader {
    Git {
        source: GitSource,
        url: String,
        path: String,
    },
    Helm {
        repo: HttpRepository,
        chart: String,
    },
    Oci {
        registry: OciRegistry,
        default_tag: Option<String>,
    },
    Crd {
        provider: Arc<dyn CrdProvider>,
        name: String,
    },
}

impl ChartLoader {
    /// Build the loader for `source_type`
    pub fn new(source_type: SourceType, template_ref: &TemplateRef, ctx: &SourceContext) -> Result<Self> {
        let loader = match source_type {
            SourceType::Git => ChartLoader::Git {
                source: GitSource::new(&ctx.config.git),
                url: template_ref.url.clone(),
                path: template_ref.path.clone(),
            },
            SourceType::Helm => {
                let chart = template_ref.path.trim_matches('/').to_string();
                if chart.is_empty() {
                    return Err(RepoError::MalformedArtifact {
                        location: template_ref.url.clone(),
                        message: "no chart name given for chart repository".to_string(),
                        hint: Some("set templateRef.path to the chart name in the repository index".to_string()),
                    });
                }
                ChartLoader::Helm {
                    repo: HttpRepository::new(&template_ref.url, ctx.client.clone(), ctx.credentials.clone()),
                    chart,
                }
            }
            SourceType::Oci => {
                let reference = OciReference::parse(&template_ref.url)?.join(&template_ref.path);
                ChartLoader::Oci {
                    default_tag: reference.tag.clone(),
                    registry: OciRegistry::new(reference, ctx.client.clone(), ctx.credentials.clone()),
                }
            }
            SourceType::Crd => {
                let name = template_ref
                    .crd_name
                    .clone()
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| RepoError::Discovery {
                        name: template_ref.display_name(),
                        message: "crd source requires templateRef.crdName".to_string(),
                    })?;
                ChartLoader::Crd {
                    provider: ctx.crd_provider.clone(),
                    name,
                }
            }
        };
        Ok(loader)
    }

    pub fn source_type(&self) -> SourceType {
        match self {
            ChartLoader::Git { .. } => SourceType::Git,
            ChartLoader::Helm { .. } => SourceType::Helm,
            ChartLoader::Oci { .. } => SourceType::Oci,
            ChartLoader::Crd { .. } => SourceType::Crd,
        }
    }

    /// Resolve a floating spec to a strict version
    pub async fn resolve_version(&self, spec: &str) -> Result<String> {
        let spec = spec.trim();
        match self {
            ChartLoader::Git { source, url, .. } => source.resolve_version(url, spec).await,
            ChartLoader::Helm { repo, chart } => {
                let index = repo.fetch_index().await?;
                let entry = repo.select(&index, chart, spec)?;
                tracing::debug!(repo = %repo.url(), %chart, %spec, version = %entry.version, "resolved chart version");
                Ok(entry.version.clone())
            }
            ChartLoader::Oci { registry, default_tag } => {
                let spec = match (spec, default_tag) {
                    ("", Some(tag)) => tag.as_str(),
                    _ => spec,
                };
                if let Ok(SemverSpec::Exact(_)) = SemverSpec::parse(spec) {
                    return Ok(spec.to_string());
                }
                let tags = registry.list_tags().await?;
                if tags.iter().any(|t| t == spec) {
                    return Ok(spec.to_string());
                }
                let version = resolve_semver(spec, &tags).ok_or_else(|| RepoError::VersionNotFound {
                    name: registry.reference().repository.clone(),
                    spec: spec.to_string(),
                    repo: registry.reference().to_string(),
                    available: describe_candidates(&tags),
                })?;
                tracing::debug!(reference = %registry.reference(), %spec, %version, "resolved OCI tag");
                Ok(version)
            }
            ChartLoader::Crd { provider, name } => {
                let crd = provider.get_crd(name).await?;
                preferred_version(&crd)
                    .map(|v| v.name.clone())
                    .ok_or_else(|| RepoError::MalformedArtifact {
                        location: format!("crd/{}", name),
                        message: "CustomResourceDefinition declares no versions".to_string(),
                        hint: None,
                    })
            }
        }
    }

    /// Load the artifact at a strict version, dependencies attached
    pub async fn load(&self, version: &str, ctx: &SourceContext) -> Result<Template> {
        if let ChartLoader::Crd { provider, name } = self {
            let crd = provider.get_crd(name).await?;
            return template_from_crd(&crd);
        }

        let location = self.location(version);
        let files = self.fetch_chart_files(version).await?;
        DependencyAssembler::new(ctx).assemble(&files, &location).await
    }

    /// Fetch and partition the chart bundle at a strict version
    pub(crate) async fn fetch_chart_files(&self, version: &str) -> Result<ChartFiles> {
        let location = self.location(version);
        let files = match self {
            ChartLoader::Git { source, url, path } => {
                let tree = source.fetch_files(url, version, path).await?;
                ChartFiles::partition(tree)
            }
            ChartLoader::Helm { repo, chart } => {
                let index = repo.fetch_index().await?;
                let entry = index.get_version(chart, version).ok_or_else(|| RepoError::VersionNotFound {
                    name: chart.clone(),
                    spec: version.to_string(),
                    repo: repo.url().to_string(),
                    available: describe_candidates(&index.versions(chart)),
                })?;
                let archive = repo.download(entry).await?;
                ChartFiles::from_archive(&archive)
            }
            ChartLoader::Oci { registry, .. } => {
                let archive = registry.pull_chart(version).await?;
                ChartFiles::from_archive(&archive)
            }
            ChartLoader::Crd { name, .. } => {
                return Err(RepoError::MalformedArtifact {
                    location: format!("crd/{}", name),
                    message: "CRD sources carry no chart files".to_string(),
                    hint: None,
                });
            }
        };
        files.map_err(|e| RepoError::from_core(e, &location))
    }

    fn location(&self, version: &str) -> String {
        match self {
            ChartLoader::Git { url, path, .. } if path.is_empty() => format!("{}@{}", url, version),
            ChartLoader::Git { url, path, .. } => format!("{}//{}@{}", url, path, version),
            ChartLoader::Helm { repo, chart } => format!("{}/{}@{}", repo.url(), chart, version),
            ChartLoader::Oci { registry, .. } => format!("{}:{}", registry.reference(), version),
            ChartLoader::Crd { name, .. } => format!("crd/{}", name),
        }
    }
}

/// Determine the source type of a reference
///
/// An explicit type wins. Otherwise a CRD name, an `oci://` URL, a Git-only
/// URL shape, a reachable Git remote and a reachable chart repository index
/// are tried in that order.
pub async fn classify(template_ref: &TemplateRef, ctx: &SourceContext) -> Result<SourceType> {
    if let Some(source_type) = template_ref.source_type {
        return Ok(source_type);
    }
    if template_ref.crd_name.as_deref().is_some_and(|n| !n.is_empty()) {
        return Ok(SourceType::Crd);
    }

    let url = template_ref.url.trim();
    if url.starts_with("oci://") {
        return Ok(SourceType::Oci);
    }
    if looks_like_git(url) {
        return Ok(SourceType::Git);
    }

    let git = GitSource::new(&ctx.config.git);
    match git.ls_remote(url).await {
        Ok(refs) if !refs.refs.is_empty() => {
            tracing::debug!(%url, "classified as git");
            return Ok(SourceType::Git);
        }
        Ok(_) => {}
        Err(e) => tracing::debug!(%url, error = %e, "not a git remote"),
    }

    let repo = HttpRepository::new(url, ctx.client.clone(), ctx.credentials.clone());
    if repo.probe().await {
        tracing::debug!(%url, "classified as chart repository");
        return Ok(SourceType::Helm);
    }

    Err(RepoError::SourceUnreachable {
        url: url.to_string(),
        message: "not a Git remote, chart repository, OCI registry or CRD".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stencil_core::config::StencilConfig;

    fn ctx() -> SourceContext {
        SourceContext::new(StencilConfig::default())
    }

    #[tokio::test]
    async fn test_classify_without_network() {
        let ctx = ctx();

        let explicit = TemplateRef {
            url: "oci://ghcr.io/acme/web".into(),
            source_type: Some(SourceType::Helm),
            ..Default::default()
        };
        assert_eq!(classify(&explicit, &ctx).await.unwrap(), SourceType::Helm);

        let crd = TemplateRef {
            crd_name: Some("widgets.example.com".into()),
            ..Default::default()
        };
        assert_eq!(classify(&crd, &ctx).await.unwrap(), SourceType::Crd);

        let oci = TemplateRef {
            url: "oci://ghcr.io/acme/web".into(),
            ..Default::default()
        };
        assert_eq!(classify(&oci, &ctx).await.unwrap(), SourceType::Oci);

        let git = TemplateRef {
            url: "https://github.com/acme/charts.git".into(),
            ..Default::default()
        };
        assert_eq!(classify(&git, &ctx).await.unwrap(), SourceType::Git);
    }

    #[test]
    fn test_helm_loader_needs_chart_name() {
        let r = TemplateRef {
            url: "https://charts.example.com".into(),
            ..Default::default()
        };
        let err = ChartLoader::new(SourceType::Helm, &r, &ctx()).err().unwrap();
        assert!(matches!(err, RepoError::MalformedArtifact { .. }));
    }

    #[test]
    fn test_crd_loader_needs_name() {
        let err = ChartLoader::new(SourceType::Crd, &TemplateRef::default(), &ctx())
            .err()
            .unwrap();
        assert!(matches!(err, RepoError::Discovery { .. }));
    }

    #[test]
    fn test_location() {
        let r = TemplateRef {
            url: "oci://ghcr.io/acme/charts".into(),
            path: "web".into(),
            ..Default::default()
        };
        let loader = ChartLoader::new(SourceType::Oci, &r, &ctx()).unwrap();
        assert_eq!(loader.source_type(), SourceType::Oci);
        assert_eq!(loader.location("1.0.0"), "oci://ghcr.io/acme/charts/web:1.0.0");
    }
}
