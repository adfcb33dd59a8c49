//! Prune command - delete managed resources the current render drops

use std::path::Path;

use console::style;
use stencil_core::StencilConfig;

use crate::commands::{load_module, reconciler};
use crate::display;
use crate::error::Result;

pub async fn run(module_path: &Path, dry_run: bool, config: &StencilConfig) -> Result<()> {
    let module = load_module(module_path)?;
    let reconciler = reconciler(config, false).await?;
    let (_, manifest) = reconciler.render(&module).await?;

    if dry_run {
        let stale: Vec<_> = reconciler
            .get_managed_resources(&module, Some(&manifest))
            .await?
            .into_iter()
            .filter(|r| r.deleted)
            .collect();
        display::print_resources(&stale);
        return Ok(());
    }

    let pruned = reconciler.prune(&module, &manifest).await?;
    if pruned.is_empty() {
        println!("{}", style("Nothing to prune").dim());
    }
    for resource in &pruned {
        println!("{} {}", style("deleted").red(), resource);
    }
    Ok(())
}
