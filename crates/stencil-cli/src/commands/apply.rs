//! Apply command - reconcile a module against the current kube context

use std::path::Path;

use stencil_core::{ModuleStatus, StencilConfig};

use crate::commands::{load_module, reconciler};
use crate::display;
use crate::error::Result;

pub async fn run(module_path: &Path, record_status: bool, config: &StencilConfig) -> Result<()> {
    let module = load_module(module_path)?;
    let reconciler = reconciler(config, record_status).await?;

    let status = match reconciler.reconcile(&module).await {
        Ok(status) => status,
        Err(e) => {
            let failed = ModuleStatus::failed(&module.status, None, e.to_string());
            display::print_status(&module, &failed);
            return Err(e.into());
        }
    };
    display::print_status(&module, &status);

    let resources = reconciler.get_managed_resources(&module, None).await?;
    display::print_resources(&resources);
    Ok(())
}
