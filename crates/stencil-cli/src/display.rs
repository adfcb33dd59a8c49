//! Display formatting for CLI output

use console::{StyledObject, style};
use stencil_core::{HealthStatus, ManagedResource, Module, ModuleStatus, ReconciliationState};

pub fn state_style(state: ReconciliationState) -> StyledObject<String> {
    let text = state.to_string();
    match state {
        ReconciliationState::Succeeded => style(text).green(),
        ReconciliationState::Failed => style(text).red(),
        ReconciliationState::Unknown => style(text).dim(),
    }
}

pub fn health_style(health: HealthStatus) -> StyledObject<String> {
    let text = health.to_string();
    match health {
        HealthStatus::Healthy => style(text).green(),
        HealthStatus::Unhealthy => style(text).red(),
        HealthStatus::Progressing => style(text).yellow(),
        HealthStatus::Unknown => style(text).dim(),
    }
}

/// Print the outcome of a reconciliation pass
pub fn print_status(module: &Module, status: &ModuleStatus) {
    println!("{}", style("MODULE").bold().underlined());
    println!("  Name:       {}", style(&module.name).cyan());
    println!("  Namespace:  {}", style(module.effective_namespace()).yellow());
    println!("  Template:   {}", module.spec.template_ref.display_name());
    println!("  Status:     {}", state_style(status.reconciliation_status.state));
    if let Some(version) = &status.resolved_version {
        println!("  Resolved:   {}", version);
    }
    if !status.reconciliation_status.reason.is_empty() {
        println!("  Reason:     {}", style(&status.reconciliation_status.reason).red());
    }
}

/// Aligned table of managed resources
pub fn resource_table(resources: &[ManagedResource]) -> String {
    let headers = ["KIND", "NAMESPACE", "NAME", "STATE"];
    let rows: Vec<[String; 4]> = resources
        .iter()
        .map(|r| {
            [
                r.kind.clone(),
                if r.namespace.is_empty() {
                    "-".to_string()
                } else {
                    r.namespace.clone()
                },
                r.name.clone(),
                if r.deleted { "deleted" } else { "current" }.to_string(),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let format_row = |cells: [&str; 4]| {
        let line = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join("  ");
        line.trim_end().to_string()
    };

    let mut out = format_row(headers);
    for row in &rows {
        out.push('\n');
        out.push_str(&format_row([&row[0], &row[1], &row[2], &row[3]]));
    }
    out
}

pub fn print_resources(resources: &[ManagedResource]) {
    println!("\n{}", style("RESOURCES").bold().underlined());
    if resources.is_empty() {
        println!("  {}", style("No managed resources").dim());
        return;
    }
    for line in resource_table(resources).lines() {
        println!("  {}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(kind: &str, namespace: &str, name: &str, deleted: bool) -> ManagedResource {
        ManagedResource {
            group: String::new(),
            version: "v1".into(),
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
            deleted,
        }
    }

    #[test]
    fn test_resource_table_alignment() {
        let table = resource_table(&[
            resource("Deployment", "apps", "web", false),
            resource("ClusterRole", "", "reader", true),
        ]);

        let expected = "\
KIND         NAMESPACE  NAME    STATE
Deployment   apps       web     current
ClusterRole  -          reader  deleted";
        assert_eq!(table, expected);
    }

    #[test]
    fn test_resource_table_empty() {
        assert_eq!(resource_table(&[]), "KIND  NAMESPACE  NAME  STATE");
    }
}
