//! Template command - render a module's manifest locally

use std::path::Path;

use stencil_core::{Capabilities, StencilConfig};
use stencil_engine::RenderEngine;

use crate::commands::{load_module, template_service};
use crate::error::Result;

pub async fn run(module_path: &Path, kube_version: &str, config: &StencilConfig) -> Result<()> {
    let module = load_module(module_path)?;
    let templates = template_service(config, &module).await?;

    let resolved = templates.resolve(&module.spec.template_ref).await?;
    let template = templates.get_template(&resolved).await?;
    tracing::info!(reference = %resolved.display_name(), "rendering module");

    let capabilities = Capabilities::new(kube_version, &config.render.templating_version);
    let manifest = RenderEngine::new(&config.render, capabilities).render_manifest(&module, &template)?;

    print!("{}", manifest);
    Ok(())
}
