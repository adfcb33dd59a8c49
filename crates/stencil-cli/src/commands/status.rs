//! Status command - health and managed resources of a module

use console::style;
use stencil_core::{Module, StencilConfig};

use crate::commands::reconciler;
use crate::display;
use crate::error::Result;

pub async fn run(name: &str, namespace: &str, config: &StencilConfig) -> Result<()> {
    let reconciler = reconciler(config, false).await?;
    let module = Module {
        name: name.to_string(),
        namespace: namespace.to_string(),
        ..Default::default()
    };

    let health = reconciler.get_module_health(name).await?;
    let resources = reconciler.get_managed_resources(&module, None).await?;

    println!("{}", style("MODULE").bold().underlined());
    println!("  Name:       {}", style(name).cyan());
    println!("  Health:     {}", display::health_style(health));
    display::print_resources(&resources);
    Ok(())
}
