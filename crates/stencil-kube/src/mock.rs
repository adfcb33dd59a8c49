//! In-memory cluster for testing
//!
//! Implements every cluster collaborator against a map of dynamic objects,
//! mimicking the apiserver behaviors the reconciler depends on: optimistic
//! concurrency on `resourceVersion`, `generation` bumps on spec changes,
//! label-selected lists and discovery of a fixed set of kinds.

use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{ApiResource, DynamicObject};
use kube::core::{GroupVersionKind, TypeMeta};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use stencil_core::ResourceRef;
use stencil_repo::{CrdProvider, RepoError};

use crate::cluster::{ClusterClient, DiscoveredResource, ResourceDiscovery, ServerVersionProvider};
use crate::error::{KubeError, Result};

/// Kinds every mock cluster serves: group, version, kind, plural, namespaced
const BUILTIN_KINDS: &[(&str, &str, &str, &str, bool)] = &[
    ("", "v1", "ConfigMap", "configmaps", true),
    ("", "v1", "Secret", "secrets", true),
    ("", "v1", "Service", "services", true),
    ("", "v1", "ServiceAccount", "serviceaccounts", true),
    ("", "v1", "Pod", "pods", true),
    ("", "v1", "PersistentVolumeClaim", "persistentvolumeclaims", true),
    ("", "v1", "Namespace", "namespaces", false),
    ("apps", "v1", "Deployment", "deployments", true),
    ("apps", "v1", "StatefulSet", "statefulsets", true),
    ("apps", "v1", "DaemonSet", "daemonsets", true),
    ("batch", "v1", "Job", "jobs", true),
    ("networking.k8s.io", "v1", "Ingress", "ingresses", true),
    ("rbac.authorization.k8s.io", "v1", "ClusterRole", "clusterroles", false),
    (
        "apiextensions.k8s.io",
        "v1",
        "CustomResourceDefinition",
        "customresourcedefinitions",
        false,
    ),
];

/// group, plural, namespace, name
type ObjectKey = (String, String, String, String);

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

struct MockState {
    kinds: Vec<DiscoveredResource>,
    objects: BTreeMap<ObjectKey, DynamicObject>,
    crds: HashMap<String, CustomResourceDefinition>,
    /// Pending injected conflicts by object name
    conflicts: HashMap<String, usize>,
    counts: OperationCounts,
    server_version: String,
    next_resource_version: u64,
}

/// In-memory cluster for tests
#[derive(Clone)]
pub struct MockCluster {
    state: Arc<RwLock<MockState>>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn builtin(group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) -> DiscoveredResource {
    let gvk = GroupVersionKind::gvk(group, version, kind);
    DiscoveredResource {
        api_resource: ApiResource::from_gvk_with_plural(&gvk, plural),
        namespaced,
    }
}

fn object_key(resource: &ApiResource, namespace: Option<&str>, name: &str) -> ObjectKey {
    (
        resource.group.clone(),
        resource.plural.clone(),
        namespace.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

/// Equality-based selector: `a=b,c=d` or a bare key for existence
fn matches_selector(obj: &DynamicObject, selector: &str) -> bool {
    let labels = obj.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => {
                let value = value.trim_start_matches('=');
                labels.get(key.trim()).map(String::as_str) == Some(value.trim())
            }
            None => labels.contains_key(term),
        })
}

impl MockCluster {
    /// Create a cluster serving the built-in kinds
    pub fn new() -> Self {
        let kinds = BUILTIN_KINDS
            .iter()
            .map(|(g, v, k, p, ns)| builtin(g, v, k, p, *ns))
            .collect();

        Self {
            state: Arc::new(RwLock::new(MockState {
                kinds,
                objects: BTreeMap::new(),
                crds: HashMap::new(),
                conflicts: HashMap::new(),
                counts: OperationCounts::default(),
                server_version: "v1.31.0".to_string(),
                next_resource_version: 1,
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MockState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MockState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_server_version(self, version: impl Into<String>) -> Self {
        self.write().server_version = version.into();
        self
    }

    /// Serve an additional kind
    pub fn register(&self, group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) {
        self.write().kinds.push(builtin(group, version, kind, plural, namespaced));
    }

    /// Make CustomResourceDefinition reads succeed for `crd`
    pub fn add_crd(&self, crd: CustomResourceDefinition) {
        let name = crd.metadata.name.clone().unwrap_or_default();
        self.write().crds.insert(name, crd);
    }

    /// Reject the next `count` updates of objects named `name` with a conflict
    pub fn inject_conflicts(&self, name: &str, count: usize) {
        self.write().conflicts.insert(name.to_string(), count);
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.read().counts.clone()
    }

    /// Seed an object directly, bypassing admission
    pub fn insert(&self, obj: DynamicObject) -> Result<()> {
        let types = obj
            .types
            .clone()
            .ok_or_else(|| KubeError::InvalidManifest("seeded object has no apiVersion/kind".to_string()))?;
        let found = self.find_kind(&types)?;
        let name = obj.metadata.name.clone().unwrap_or_default();
        let namespace = obj.metadata.namespace.clone().filter(|_| found.namespaced);

        let mut state = self.write();
        let key = object_key(&found.api_resource, namespace.as_deref(), &name);
        state.objects.insert(key, obj);
        Ok(())
    }

    fn find_kind(&self, types: &TypeMeta) -> Result<DiscoveredResource> {
        let (group, version) = match types.api_version.rsplit_once('/') {
            Some((g, v)) => (g, v),
            None => ("", types.api_version.as_str()),
        };
        self.read()
            .kinds
            .iter()
            .find(|k| {
                k.api_resource.group == group && k.api_resource.version == version && k.api_resource.kind == types.kind
            })
            .cloned()
            .ok_or_else(|| KubeError::Discovery {
                kind: format!("{}/{}", types.api_version, types.kind),
                message: "no matches for kind".to_string(),
            })
    }

    /// Look up a stored object by kind, namespace and name
    pub fn find(&self, kind: &str, namespace: &str, name: &str) -> Option<DynamicObject> {
        let state = self.read();
        let resource = state.kinds.iter().find(|k| k.api_resource.kind == kind)?;
        let namespace = resource.namespaced.then_some(namespace);
        let key = object_key(&resource.api_resource, namespace, name);
        state.objects.get(&key).cloned()
    }

    /// Every stored object of a kind
    pub fn objects_of_kind(&self, kind: &str) -> Vec<DynamicObject> {
        self.read()
            .objects
            .values()
            .filter(|o| o.types.as_ref().is_some_and(|t| t.kind == kind))
            .cloned()
            .collect()
    }

    /// Replace the `status` of a stored object
    pub fn set_status(&self, kind: &str, namespace: &str, name: &str, status: serde_json::Value) -> bool {
        let mut state = self.write();
        let Some(resource) = state.kinds.iter().find(|k| k.api_resource.kind == kind).cloned() else {
            return false;
        };
        let namespace = resource.namespaced.then_some(namespace);
        let key = object_key(&resource.api_resource, namespace, name);
        match state.objects.get_mut(&key) {
            Some(obj) => {
                obj.data["status"] = status;
                true
            }
            None => false,
        }
    }
}

impl MockState {
    fn bump_resource_version(&mut self) -> String {
        let rv = self.next_resource_version;
        self.next_resource_version += 1;
        rv.to_string()
    }
}

#[async_trait]
impl ResourceDiscovery for MockCluster {
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<DiscoveredResource> {
        self.find_kind(&TypeMeta {
            api_version: if gvk.group.is_empty() {
                gvk.version.clone()
            } else {
                format!("{}/{}", gvk.group, gvk.version)
            },
            kind: gvk.kind.clone(),
        })
    }

    async fn resolve_ref(&self, resource: &ResourceRef) -> Result<DiscoveredResource> {
        self.read()
            .kinds
            .iter()
            .find(|k| {
                k.api_resource.group == resource.group
                    && k.api_resource.version == resource.version
                    && k.api_resource.plural == resource.resource
            })
            .cloned()
            .ok_or_else(|| KubeError::Discovery {
                kind: format!("{}/{}/{}", resource.group, resource.version, resource.resource),
                message: "resource is not served".to_string(),
            })
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn get(&self, resource: &ApiResource, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>> {
        let mut state = self.write();
        state.counts.gets += 1;
        Ok(state.objects.get(&object_key(resource, namespace, name)).cloned())
    }

    async fn create(&self, resource: &ApiResource, namespace: Option<&str>, obj: &DynamicObject) -> Result<DynamicObject> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        let key = object_key(resource, namespace, &name);

        let mut state = self.write();
        state.counts.creates += 1;
        if state.objects.contains_key(&key) {
            return Err(KubeError::api_status(
                409,
                "AlreadyExists",
                format!("{} \"{}\" already exists", resource.plural, name),
            ));
        }

        let mut stored = obj.clone();
        stored.types = Some(TypeMeta {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
        });
        stored.metadata.namespace = namespace.map(str::to_string);
        stored.metadata.resource_version = Some(state.bump_resource_version());
        stored.metadata.generation = Some(1);
        stored.metadata.uid = Some(format!("uid-{}", state.next_resource_version));

        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, resource: &ApiResource, namespace: Option<&str>, obj: &DynamicObject) -> Result<DynamicObject> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        let key = object_key(resource, namespace, &name);

        let mut state = self.write();
        state.counts.updates += 1;

        if let Some(remaining) = state.conflicts.get_mut(&name).filter(|n| **n > 0) {
            *remaining -= 1;
            return Err(KubeError::api_status(
                409,
                "Conflict",
                format!("Operation cannot be fulfilled on {} \"{}\"", resource.plural, name),
            ));
        }

        let Some(current) = state.objects.get(&key).cloned() else {
            return Err(KubeError::api_status(
                404,
                "NotFound",
                format!("{} \"{}\" not found", resource.plural, name),
            ));
        };

        if obj.metadata.resource_version.is_some() && obj.metadata.resource_version != current.metadata.resource_version {
            return Err(KubeError::api_status(
                409,
                "Conflict",
                format!(
                    "Operation cannot be fulfilled on {} \"{}\": the object has been modified",
                    resource.plural, name
                ),
            ));
        }

        let mut stored = obj.clone();
        stored.types = current.types.clone();
        stored.metadata.namespace = current.metadata.namespace.clone();
        stored.metadata.uid = current.metadata.uid.clone();
        stored.metadata.resource_version = Some(state.bump_resource_version());

        let generation = current.metadata.generation.unwrap_or(1);
        stored.metadata.generation = if stored.data.get("spec") != current.data.get("spec") {
            Some(generation + 1)
        } else {
            Some(generation)
        };

        // status is owned by controllers
        match current.data.get("status") {
            Some(status) => stored.data["status"] = status.clone(),
            None => {
                if let Some(data) = stored.data.as_object_mut() {
                    data.remove("status");
                }
            }
        }

        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, resource: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()> {
        let mut state = self.write();
        state.counts.deletes += 1;
        state.objects.remove(&object_key(resource, namespace, name));
        Ok(())
    }

    async fn list(&self, resource: &ApiResource, namespace: Option<&str>, label_selector: &str) -> Result<Vec<DynamicObject>> {
        let mut state = self.write();
        state.counts.lists += 1;
        Ok(state
            .objects
            .iter()
            .filter(|((group, plural, ns, _), _)| {
                group == &resource.group && plural == &resource.plural && namespace.is_none_or(|want| want == ns.as_str())
            })
            .map(|(_, obj)| obj)
            .filter(|obj| matches_selector(obj, label_selector))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ServerVersionProvider for MockCluster {
    async fn server_version(&self) -> Result<String> {
        Ok(self.read().server_version.clone())
    }
}

#[async_trait]
impl CrdProvider for MockCluster {
    async fn get_crd(&self, name: &str) -> stencil_repo::Result<CustomResourceDefinition> {
        self.read()
            .crds
            .get(name)
            .cloned()
            .ok_or_else(|| RepoError::Discovery {
                name: name.to_string(),
                message: format!("customresourcedefinitions \"{}\" not found", name),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_map(name: &str, labels: serde_json::Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "labels": labels},
            "data": {"key": "value"}
        }))
        .unwrap()
    }

    async fn config_maps(cluster: &MockCluster) -> DiscoveredResource {
        cluster
            .resolve(&GroupVersionKind::gvk("", "v1", "ConfigMap"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let cluster = MockCluster::new();
        let cm = config_maps(&cluster).await;

        let created = cluster
            .create(&cm.api_resource, Some("apps"), &config_map("a", json!({})))
            .await
            .unwrap();
        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));
        assert_eq!(created.metadata.generation, Some(1));

        let fetched = cluster.get(&cm.api_resource, Some("apps"), "a").await.unwrap();
        assert!(fetched.is_some());
        assert!(cluster.get(&cm.api_resource, Some("other"), "a").await.unwrap().is_none());

        let err = cluster
            .create(&cm.api_resource, Some("apps"), &config_map("a", json!({})))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let cluster = MockCluster::new();
        let cm = config_maps(&cluster).await;
        let created = cluster
            .create(&cm.api_resource, Some("apps"), &config_map("a", json!({})))
            .await
            .unwrap();

        let mut stale = created.clone();
        stale.metadata.resource_version = Some("0".into());
        let err = cluster.update(&cm.api_resource, Some("apps"), &stale).await.unwrap_err();
        assert!(err.is_conflict());

        let updated = cluster.update(&cm.api_resource, Some("apps"), &created).await.unwrap();
        assert_eq!(updated.metadata.resource_version.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_generation_bumps_on_spec_change() {
        let cluster = MockCluster::new();
        let deployments = cluster
            .resolve(&GroupVersionKind::gvk("apps", "v1", "Deployment"))
            .await
            .unwrap();
        let deploy: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "spec": {"replicas": 1}
        }))
        .unwrap();

        let mut live = cluster
            .create(&deployments.api_resource, Some("apps"), &deploy)
            .await
            .unwrap();
        live.metadata.labels = Some([("tier".to_string(), "web".to_string())].into());
        let live = cluster
            .update(&deployments.api_resource, Some("apps"), &live)
            .await
            .unwrap();
        assert_eq!(live.metadata.generation, Some(1));

        let mut changed = live.clone();
        changed.data["spec"]["replicas"] = json!(3);
        let changed = cluster
            .update(&deployments.api_resource, Some("apps"), &changed)
            .await
            .unwrap();
        assert_eq!(changed.metadata.generation, Some(2));
    }

    #[tokio::test]
    async fn test_list_by_label() {
        let cluster = MockCluster::new();
        let cm = config_maps(&cluster).await;
        cluster
            .create(&cm.api_resource, Some("a"), &config_map("one", json!({"team": "x"})))
            .await
            .unwrap();
        cluster
            .create(&cm.api_resource, Some("b"), &config_map("two", json!({"team": "x"})))
            .await
            .unwrap();
        cluster
            .create(&cm.api_resource, Some("a"), &config_map("three", json!({"team": "y"})))
            .await
            .unwrap();

        assert_eq!(cluster.list(&cm.api_resource, None, "team=x").await.unwrap().len(), 2);
        assert_eq!(cluster.list(&cm.api_resource, Some("a"), "team=x").await.unwrap().len(), 1);
        assert_eq!(cluster.list(&cm.api_resource, None, "team").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_kind() {
        let cluster = MockCluster::new();
        let err = cluster
            .resolve(&GroupVersionKind::gvk("example.com", "v1", "Widget"))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::Discovery { .. }));

        cluster.register("example.com", "v1", "Widget", "widgets", true);
        let found = cluster
            .resolve(&GroupVersionKind::gvk("example.com", "v1", "Widget"))
            .await
            .unwrap();
        assert_eq!(found.api_resource.plural, "widgets");
    }
}
