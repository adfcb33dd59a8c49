//! Dependency assembly
//!
//! Attaches every dependency declared in `Chart.yaml` to its parent artifact.
//! A bundle vendored under `charts/` whose declared name matches is used
//! directly; anything else is loaded from the dependency's repository
//! through the regular loaders. Assembly fails as a whole: a single failing
//! dependency fails the parent.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use stencil_core::{ChartDependency, ChartFiles, SourceType, Template, TemplateDependency, TemplateRef};

use crate::cache::CacheKey;
use crate::error::{RepoError, Result};
use crate::loader::ChartLoader;
use crate::service::SourceContext;

/// Deepest dependency chain accepted
pub const MAX_DEPENDENCY_DEPTH: usize = 10;

type AssembleFuture<'a> = Pin<Box<dyn Future<Output = Result<Template>> + Send + 'a>>;

/// Builds artifacts with their dependency trees attached
pub struct DependencyAssembler<'a> {
    ctx: &'a SourceContext,
}

impl<'a> DependencyAssembler<'a> {
    pub fn new(ctx: &'a SourceContext) -> Self {
        Self { ctx }
    }

    /// Build the artifact for `files` and its whole dependency tree
    pub async fn assemble(&self, files: &ChartFiles, location: &str) -> Result<Template> {
        let mut chain = Vec::new();
        self.assemble_at(files, location.to_string(), &mut chain).await
    }

    fn assemble_at<'b>(
        &'b self,
        files: &'b ChartFiles,
        location: String,
        chain: &'b mut Vec<String>,
    ) -> AssembleFuture<'b> {
        Box::pin(async move {
            let mut template =
                Template::from_chart_files(files, &location).map_err(|e| RepoError::from_core(e, &location))?;

            if chain.contains(&template.name) {
                return Err(RepoError::DependencyResolution {
                    chart: template.name.clone(),
                    message: format!("dependency cycle: {} -> {}", chain.join(" -> "), template.name),
                });
            }
            if chain.len() >= MAX_DEPENDENCY_DEPTH {
                return Err(RepoError::DependencyResolution {
                    chart: template.name.clone(),
                    message: format!(
                        "dependency chain exceeds maximum depth of {}: {}",
                        MAX_DEPENDENCY_DEPTH,
                        chain.join(" -> ")
                    ),
                });
            }

            chain.push(template.name.clone());
            let result = self.attach_dependencies(&mut template, files, &location, chain).await;
            chain.pop();
            result?;

            Ok(template)
        })
    }

    async fn attach_dependencies(
        &self,
        template: &mut Template,
        files: &ChartFiles,
        location: &str,
        chain: &mut Vec<String>,
    ) -> Result<()> {
        let declared = template
            .metadata
            .as_ref()
            .map(|m| m.dependencies.clone())
            .unwrap_or_default();

        let inline_names: Vec<Option<String>> = files.subcharts.iter().map(ChartFiles::declared_name).collect();
        let mut used_inline = HashSet::new();

        for dep in &declared {
            let inline = inline_names
                .iter()
                .enumerate()
                .find(|(i, name)| !used_inline.contains(i) && name.as_deref() == Some(dep.name.as_str()))
                .map(|(i, _)| i);

            let child = match inline {
                Some(i) => {
                    used_inline.insert(i);
                    tracing::debug!(parent = %template.name, dependency = %dep.name, "using vendored dependency");
                    let child_location = format!("{}/charts/{}", location, dep.name);
                    Arc::new(self.assemble_at(&files.subcharts[i], child_location, chain).await?)
                }
                None => self.load_remote(&template.name, dep, chain).await?,
            };

            template.dependencies.push(TemplateDependency {
                name: dep.effective_name().to_string(),
                condition: dep.condition.clone(),
                template: child,
            });
        }

        for (i, sub) in files.subcharts.iter().enumerate() {
            if used_inline.contains(&i) {
                continue;
            }
            let name = inline_names[i].clone().unwrap_or_default();
            let child_location = format!("{}/charts/{}", location, name);
            let child = self.assemble_at(sub, child_location, chain).await?;
            template.dependencies.push(TemplateDependency {
                name: child.name.clone(),
                condition: None,
                template: Arc::new(child),
            });
        }

        Ok(())
    }

    /// Load a dependency that is not vendored
    async fn load_remote(
        &self,
        parent: &str,
        dep: &ChartDependency,
        chain: &mut Vec<String>,
    ) -> Result<Arc<Template>> {
        let repository = dep.repository.trim();
        let unresolvable = |message: String| RepoError::DependencyResolution {
            chart: parent.to_string(),
            message,
        };

        if repository.is_empty() {
            return Err(unresolvable(format!(
                "dependency '{}' is not vendored under charts/ and declares no repository",
                dep.name
            )));
        }
        if repository.starts_with("file://") || repository.starts_with('@') || repository.starts_with("alias:") {
            return Err(unresolvable(format!(
                "dependency '{}' uses repository '{}', which cannot be resolved remotely",
                dep.name, repository
            )));
        }

        if chain.iter().any(|c| c == &dep.name) {
            return Err(unresolvable(format!(
                "dependency cycle: {} -> {}",
                chain.join(" -> "),
                dep.name
            )));
        }

        let source_type = if repository.starts_with("oci://") {
            SourceType::Oci
        } else {
            SourceType::Helm
        };
        let dep_ref = TemplateRef {
            url: repository.to_string(),
            path: dep.name.clone(),
            version: dep.version.clone(),
            source_type: Some(source_type),
            ..Default::default()
        };

        let failed = |e: RepoError| match e {
            RepoError::DependencyResolution { .. } => e,
            other => unresolvable(format!("dependency '{}': {}", dep.name, other)),
        };

        let loader = ChartLoader::new(source_type, &dep_ref, self.ctx).map_err(failed)?;
        let version = loader.resolve_version(&dep.version).await.map_err(failed)?;
        let resolved = dep_ref.resolved(source_type, &version);

        let key = CacheKey::for_ref(&resolved);
        if let Some(hit) = key.as_ref().and_then(|k| self.ctx.cache.get_template(k)) {
            return Ok(hit);
        }

        tracing::info!(parent = %parent, dependency = %dep.name, %version, %repository, "loading dependency");
        let files = loader.fetch_chart_files(&version).await.map_err(failed)?;
        let location = resolved.display_name();
        let child = Arc::new(self.assemble_at(&files, location, chain).await.map_err(failed)?);

        if let Some(key) = key {
            self.ctx.cache.insert_template(key, child.clone());
        }
        Ok(child)
    }
}
