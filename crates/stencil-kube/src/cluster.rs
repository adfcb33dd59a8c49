//! Cluster collaborators
//!
//! The reconciler talks to the cluster only through these traits, so the
//! same pipeline runs against a live apiserver ([`KubeCluster`]) or the
//! in-memory [`MockCluster`](crate::MockCluster).

use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, ListParams, PostParams},
    core::{GroupVersion, GroupVersionKind, TypeMeta},
    discovery::{self, ApiResource, Scope},
};
use std::sync::Arc;

use stencil_core::ResourceRef;
use stencil_repo::{CrdProvider, RepoError};

use crate::error::{KubeError, Result};

/// A kind as served by the cluster
#[derive(Debug, Clone)]
pub struct DiscoveredResource {
    pub api_resource: ApiResource,
    pub namespaced: bool,
}

impl DiscoveredResource {
    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(
            &self.api_resource.group,
            &self.api_resource.version,
            &self.api_resource.kind,
        )
    }

    /// Reference recorded in the module status
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            group: self.api_resource.group.clone(),
            version: self.api_resource.version.clone(),
            resource: self.api_resource.plural.clone(),
        }
    }

    /// Stable key for kind sets
    pub fn key(&self) -> String {
        format!("{}/{}", self.api_resource.api_version, self.api_resource.kind)
    }
}

/// Maps kinds to the resources that serve them
#[async_trait]
pub trait ResourceDiscovery: Send + Sync {
    /// Resolve a group/version/kind
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<DiscoveredResource>;

    /// Resolve a group/version/plural recorded in a module status
    async fn resolve_ref(&self, resource: &ResourceRef) -> Result<DiscoveredResource>;
}

/// Dynamic object access keyed by resource, namespace and name
///
/// `namespace` is `None` for cluster-scoped kinds, and for `list` it means
/// every namespace.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get(&self, resource: &ApiResource, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>>;

    async fn create(&self, resource: &ApiResource, namespace: Option<&str>, obj: &DynamicObject) -> Result<DynamicObject>;

    async fn update(&self, resource: &ApiResource, namespace: Option<&str>, obj: &DynamicObject) -> Result<DynamicObject>;

    async fn delete(&self, resource: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()>;

    async fn list(&self, resource: &ApiResource, namespace: Option<&str>, label_selector: &str) -> Result<Vec<DynamicObject>>;
}

/// Reports the apiserver version, e.g. `v1.31.2`
#[async_trait]
pub trait ServerVersionProvider: Send + Sync {
    async fn server_version(&self) -> Result<String>;
}

/// Cluster collaborators shared by a reconciler
#[derive(Clone)]
pub struct ClusterContext {
    pub client: Arc<dyn ClusterClient>,
    pub discovery: Arc<dyn ResourceDiscovery>,
    pub version: Arc<dyn ServerVersionProvider>,
}

impl ClusterContext {
    /// Context backed by a single implementation of every collaborator
    pub fn from_cluster<C>(cluster: Arc<C>) -> Self
    where
        C: ClusterClient + ResourceDiscovery + ServerVersionProvider + 'static,
    {
        Self {
            client: cluster.clone(),
            discovery: cluster.clone(),
            version: cluster,
        }
    }
}

/// Convert TypeMeta to GroupVersionKind
///
/// - "apps/v1" -> group="apps", version="v1"
/// - "v1" -> group="", version="v1" (core API)
pub fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), tm.api_version.clone()),
    };

    GroupVersionKind {
        group,
        version,
        kind: tm.kind.clone(),
    }
}

/// Cluster collaborators backed by a live apiserver
pub struct KubeCluster {
    client: Client,
    field_manager: String,
    kinds: DashMap<String, DiscoveredResource>,
}

impl KubeCluster {
    /// Connect using the current kube context
    pub async fn try_default(field_manager: impl Into<String>) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::with_client(client, field_manager))
    }

    pub fn with_client(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            kinds: DashMap::new(),
        }
    }

    pub fn kube_client(&self) -> &Client {
        &self.client
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ResourceDiscovery for KubeCluster {
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<DiscoveredResource> {
        let key = format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind);
        if let Some(hit) = self.kinds.get(&key) {
            return Ok(hit.value().clone());
        }

        let (api_resource, caps) =
            discovery::pinned_kind(&self.client, gvk)
                .await
                .map_err(|e| KubeError::Discovery {
                    kind: key.clone(),
                    message: e.to_string(),
                })?;
        let found = DiscoveredResource {
            api_resource,
            namespaced: caps.scope == Scope::Namespaced,
        };

        tracing::debug!(kind = %key, namespaced = found.namespaced, "discovered kind");
        self.kinds.insert(key, found.clone());
        Ok(found)
    }

    async fn resolve_ref(&self, resource: &ResourceRef) -> Result<DiscoveredResource> {
        let gv = GroupVersion::gv(&resource.group, &resource.version);
        let not_served = |message: String| KubeError::Discovery {
            kind: format!("{}/{}/{}", resource.group, resource.version, resource.resource),
            message,
        };

        let group = discovery::pinned_group(&self.client, &gv)
            .await
            .map_err(|e| not_served(e.to_string()))?;

        group
            .versioned_resources(&resource.version)
            .into_iter()
            .find(|(ar, _)| ar.plural == resource.resource)
            .map(|(api_resource, caps)| DiscoveredResource {
                api_resource,
                namespaced: caps.scope == Scope::Namespaced,
            })
            .ok_or_else(|| not_served("resource is not served".to_string()))
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get(&self, resource: &ApiResource, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>> {
        Ok(self.api(resource, namespace).get_opt(name).await?)
    }

    async fn create(&self, resource: &ApiResource, namespace: Option<&str>, obj: &DynamicObject) -> Result<DynamicObject> {
        Ok(self.api(resource, namespace).create(&self.post_params(), obj).await?)
    }

    async fn update(&self, resource: &ApiResource, namespace: Option<&str>, obj: &DynamicObject) -> Result<DynamicObject> {
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| KubeError::InvalidManifest("object missing metadata.name".to_string()))?;
        Ok(self
            .api(resource, namespace)
            .replace(name, &self.post_params(), obj)
            .await?)
    }

    async fn delete(&self, resource: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()> {
        let params = DeleteParams {
            propagation_policy: Some(kube::api::PropagationPolicy::Background),
            ..Default::default()
        };

        match self.api(resource, namespace).delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(KubeError::Api(e)),
        }
    }

    async fn list(&self, resource: &ApiResource, namespace: Option<&str>, label_selector: &str) -> Result<Vec<DynamicObject>> {
        let params = ListParams::default().labels(label_selector);
        let list = self.api(resource, namespace).list(&params).await?;
        Ok(list.items)
    }
}

#[async_trait]
impl ServerVersionProvider for KubeCluster {
    async fn server_version(&self) -> Result<String> {
        let info = self.client.apiserver_version().await?;
        Ok(info.git_version)
    }
}

#[async_trait]
impl CrdProvider for KubeCluster {
    async fn get_crd(&self, name: &str) -> stencil_repo::Result<CustomResourceDefinition> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        api.get(name).await.map_err(|e| RepoError::Discovery {
            name: name.to_string(),
            message: e.to_string(),
        })
    }
}
