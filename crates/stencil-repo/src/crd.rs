//! CustomResourceDefinition sources
//!
//! A CRD-backed template carries no manifests: its field tree comes from the
//! storage version's `spec` schema and rendering emits one custom resource.

use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionVersion,
};

use stencil_core::{CrdTarget, FieldTree, Template};

use crate::error::{RepoError, Result};

/// Reads CustomResourceDefinitions from the cluster
#[async_trait]
pub trait CrdProvider: Send + Sync {
    async fn get_crd(&self, name: &str) -> Result<CustomResourceDefinition>;
}

/// Provider for contexts without cluster access
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCrdProvider;

#[async_trait]
impl CrdProvider for NoCrdProvider {
    async fn get_crd(&self, name: &str) -> Result<CustomResourceDefinition> {
        Err(RepoError::Discovery {
            name: name.to_string(),
            message: "no cluster connection configured for CRD templates".to_string(),
        })
    }
}

/// Storage version, else the first served one, else the first declared
pub fn preferred_version(crd: &CustomResourceDefinition) -> Option<&CustomResourceDefinitionVersion> {
    let versions = &crd.spec.versions;
    versions
        .iter()
        .find(|v| v.storage)
        .or_else(|| versions.iter().find(|v| v.served))
        .or_else(|| versions.first())
}

/// Build a template artifact from a CRD
pub fn template_from_crd(crd: &CustomResourceDefinition) -> Result<Template> {
    let name = crd.metadata.name.clone().unwrap_or_default();
    let version = preferred_version(crd).ok_or_else(|| RepoError::MalformedArtifact {
        location: format!("crd/{}", name),
        message: "CustomResourceDefinition declares no versions".to_string(),
        hint: None,
    })?;

    let spec_schema = version
        .schema
        .as_ref()
        .and_then(|s| s.open_api_v3_schema.as_ref())
        .and_then(|s| s.properties.as_ref())
        .and_then(|props| props.get("spec"));

    let schema = match spec_schema {
        Some(props) => {
            let json = serde_json::to_value(props)?;
            FieldTree::from_json_schema(&json)
                .map_err(|e| RepoError::from_core(e, &format!("crd/{}", name)))?
        }
        None => FieldTree::default(),
    };

    let target = CrdTarget {
        name: name.clone(),
        group: crd.spec.group.clone(),
        version: version.name.clone(),
        kind: crd.spec.names.kind.clone(),
        plural: crd.spec.names.plural.clone(),
        namespaced: crd.spec.scope == "Namespaced",
    };

    Ok(Template {
        name,
        schema,
        crd_target: Some(target),
        ..Default::default()
    })
}
