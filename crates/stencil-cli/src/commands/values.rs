//! Values command - print a template's initial values

use std::path::Path;

use stencil_core::StencilConfig;

use crate::commands::{load_module, template_service};
use crate::error::{CliError, Result};

pub async fn run(module_path: &Path, json: bool, config: &StencilConfig) -> Result<()> {
    let module = load_module(module_path)?;
    let templates = template_service(config, &module).await?;

    let values = templates.get_initial_values(&module.spec.template_ref).await?;

    let rendered = if json {
        serde_json::to_string_pretty(values.inner()).map_err(|e| e.to_string())
    } else {
        serde_yaml::to_string(values.inner()).map_err(|e| e.to_string())
    }
    .map_err(|message| CliError::Other { message })?;

    println!("{}", rendered.trim_end());
    Ok(())
}
