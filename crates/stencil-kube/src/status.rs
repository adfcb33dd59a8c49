//! Module status persistence

use async_trait::async_trait;
use dashmap::DashMap;
use kube::Client;
use kube::api::{Api, ApiResource, DynamicObject, Patch, PatchParams};
use kube::core::GroupVersionKind;

use stencil_core::{Module, ModuleStatus};

use crate::error::Result;

/// API group of the Module custom resource
pub const MODULE_GROUP: &str = "stencil.dev";
pub const MODULE_VERSION: &str = "v1alpha1";
pub const MODULE_KIND: &str = "Module";

/// Records the outcome of a reconciliation pass
#[async_trait]
pub trait ModuleStatusWriter: Send + Sync {
    async fn write_status(&self, module: &Module, status: &ModuleStatus) -> Result<()>;
}

/// Keeps statuses in memory, keyed by namespace and name
#[derive(Debug, Default)]
pub struct InMemoryStatusWriter {
    statuses: DashMap<(String, String), ModuleStatus>,
}

impl InMemoryStatusWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last status written for a module
    pub fn get(&self, namespace: &str, name: &str) -> Option<ModuleStatus> {
        self.statuses
            .get(&(namespace.to_string(), name.to_string()))
            .map(|s| s.value().clone())
    }
}

#[async_trait]
impl ModuleStatusWriter for InMemoryStatusWriter {
    async fn write_status(&self, module: &Module, status: &ModuleStatus) -> Result<()> {
        self.statuses
            .insert((module.namespace.clone(), module.name.clone()), status.clone());
        Ok(())
    }
}

/// Patches the `status` subresource of `stencil.dev` Module objects
pub struct KubeStatusWriter {
    client: Client,
    field_manager: String,
    resource: ApiResource,
}

impl KubeStatusWriter {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        let gvk = GroupVersionKind::gvk(MODULE_GROUP, MODULE_VERSION, MODULE_KIND);
        Self {
            client,
            field_manager: field_manager.into(),
            resource: ApiResource::from_gvk_with_plural(&gvk, "modules"),
        }
    }
}

#[async_trait]
impl ModuleStatusWriter for KubeStatusWriter {
    async fn write_status(&self, module: &Module, status: &ModuleStatus) -> Result<()> {
        let namespace = if module.namespace.is_empty() {
            "default"
        } else {
            module.namespace.as_str()
        };
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &self.resource);

        let patch = serde_json::json!({ "status": status });
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        api.patch_status(&module.name, &params, &Patch::Merge(&patch)).await?;

        tracing::debug!(
            module = %module.name,
            %namespace,
            state = %status.reconciliation_status.state,
            "wrote module status"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stencil_core::ReconciliationState;

    #[tokio::test]
    async fn test_in_memory_overwrites() {
        let writer = InMemoryStatusWriter::new();
        let module = Module {
            name: "web".into(),
            namespace: "apps".into(),
            ..Default::default()
        };

        writer
            .write_status(&module, &ModuleStatus::succeeded(Some("1.0.0".into()), vec![]))
            .await
            .unwrap();
        let previous = writer.get("apps", "web").unwrap();
        writer
            .write_status(&module, &ModuleStatus::failed(&previous, None, "boom"))
            .await
            .unwrap();

        let status = writer.get("apps", "web").unwrap();
        assert_eq!(status.reconciliation_status.state, ReconciliationState::Failed);
        assert_eq!(status.resolved_version.as_deref(), Some("1.0.0"));
        assert!(writer.get("other", "web").is_none());
    }
}
