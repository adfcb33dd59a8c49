//! CLI commands

pub mod apply;
pub mod prune;
pub mod status;
pub mod template;
pub mod values;

use std::path::Path;
use std::sync::Arc;

use stencil_core::{Module, SourceType, StencilConfig};
use stencil_kube::{ClusterContext, InMemoryStatusWriter, KubeCluster, KubeStatusWriter, ModuleStatusWriter, Reconciler};
use stencil_repo::{SourceContext, TemplateService};

use crate::error::{CliError, Result};

/// Read a Module record from a YAML file
pub fn load_module(path: &Path) -> Result<Module> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CliError::input_with_help(
            format!("cannot read module file {}: {}", path.display(), e),
            "pass the path of a YAML file holding a Module record",
        )
    })?;
    let module = Module::from_yaml(&content)
        .map_err(|e| CliError::input(format!("{}: {}", path.display(), e)))?;

    if module.name.is_empty() {
        return Err(CliError::input(format!("{}: module has no name", path.display())));
    }
    Ok(module)
}

/// Connect to the cluster of the current kube context
pub async fn connect(config: &StencilConfig) -> Result<Arc<KubeCluster>> {
    let cluster = KubeCluster::try_default(config.apply.field_manager.clone()).await?;
    Ok(Arc::new(cluster))
}

/// Template service for `module`
///
/// A cluster connection is only opened for `crd` sources, which read their
/// schema from the API server.
pub async fn template_service(config: &StencilConfig, module: &Module) -> Result<TemplateService> {
    let mut ctx = SourceContext::new(config.clone());
    if module.spec.template_ref.source_type == Some(SourceType::Crd) {
        ctx = ctx.with_crd_provider(connect(config).await?);
    }
    Ok(TemplateService::new(ctx))
}

/// Reconciler wired to the current kube context
///
/// With `record_status` the outcome is patched onto the Module custom
/// resource; otherwise it is only kept for this process.
pub async fn reconciler(config: &StencilConfig, record_status: bool) -> Result<Reconciler> {
    let cluster = connect(config).await?;

    let templates = TemplateService::new(SourceContext::new(config.clone()).with_crd_provider(cluster.clone()));
    let status_writer: Arc<dyn ModuleStatusWriter> = if record_status {
        Arc::new(KubeStatusWriter::new(
            cluster.kube_client().clone(),
            config.apply.field_manager.clone(),
        ))
    } else {
        Arc::new(InMemoryStatusWriter::new())
    };

    Ok(Reconciler::connect(templates, ClusterContext::from_cluster(cluster), status_writer, config).await?)
}
