//! Manifest apply
//!
//! Each document of a rendered manifest becomes a [`DynamicObject`] owned by
//! the module through two labels. Objects that don't exist are created;
//! existing ones are updated on top of the fields the cluster owns
//! (`resourceVersion`, finalizers, immutable Job selectors, bound PVC specs).
//! A failing object doesn't stop the batch.

use kube::api::DynamicObject;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;

use stencil_core::config::ApplyConfig;
use stencil_core::{ManagedResource, Module, split_documents};

use crate::cluster::{ClusterContext, DiscoveredResource, gvk_from_type_meta};
use crate::error::{ApplyFailure, KubeError, Result};

/// Label marking objects created by stencil
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "stencil";

/// Label naming the owning module
pub const MODULE_LABEL: &str = "stencil.dev/module";

/// Longest wait between two conflict retries
const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Label selector matching every object owned by `module`
pub fn ownership_selector(module: &str) -> String {
    format!("{}={},{}={}", MANAGED_BY_LABEL, MANAGED_BY_VALUE, MODULE_LABEL, module)
}

/// Outcome of applying one manifest
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub created: Vec<ManagedResource>,
    pub updated: Vec<ManagedResource>,
    pub failures: Vec<ApplyFailure>,
}

impl ApplyReport {
    /// Check if every object went through
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn total(&self) -> usize {
        self.created.len() + self.updated.len() + self.failures.len()
    }

    /// Format as human-readable summary
    pub fn summary(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if !self.created.is_empty() {
            parts.push(format!("{} created", self.created.len()));
        }
        if !self.updated.is_empty() {
            parts.push(format!("{} updated", self.updated.len()));
        }
        if !self.failures.is_empty() {
            parts.push(format!("{} failed", self.failures.len()));
        }
        if parts.is_empty() {
            "No resources applied".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// Fail with [`KubeError::Apply`] when any object failed
    pub fn into_result(self) -> Result<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(KubeError::Apply {
                failures: self.failures,
            })
        }
    }
}

/// Manifest document ready for the cluster
#[derive(Debug, Clone)]
pub struct ParsedObject {
    pub obj: DynamicObject,
    pub resource: DiscoveredResource,
    /// Effective namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
}

impl ParsedObject {
    pub fn name(&self) -> &str {
        self.obj.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn managed_resource(&self) -> ManagedResource {
        let ar = &self.resource.api_resource;
        ManagedResource {
            group: ar.group.clone(),
            version: ar.version.clone(),
            kind: ar.kind.clone(),
            name: self.name().to_string(),
            namespace: self.namespace.clone().unwrap_or_default(),
            deleted: false,
        }
    }
}

/// Applies rendered manifests for one module
pub struct Applier<'a> {
    cluster: &'a ClusterContext,
    config: &'a ApplyConfig,
}

impl<'a> Applier<'a> {
    pub fn new(cluster: &'a ClusterContext, config: &'a ApplyConfig) -> Self {
        Self { cluster, config }
    }

    /// Decode and resolve every document of `manifest`
    ///
    /// A document that isn't a named Kubernetes object, or whose kind the
    /// cluster doesn't serve, fails the whole manifest before anything is
    /// written.
    pub async fn parse_manifest(&self, module: &Module, manifest: &str) -> Result<Vec<ParsedObject>> {
        let mut objects = Vec::new();

        for (index, doc) in split_documents(manifest).into_iter().enumerate() {
            let mut obj: DynamicObject = serde_yaml::from_str(doc)
                .map_err(|e| KubeError::InvalidManifest(format!("document {}: {}", index, e)))?;

            let types = obj.types.clone().ok_or_else(|| {
                KubeError::InvalidManifest(format!("document {}: missing apiVersion or kind", index))
            })?;
            if obj.metadata.name.as_deref().is_none_or(str::is_empty) {
                return Err(KubeError::InvalidManifest(format!(
                    "document {}: {} has no metadata.name",
                    index, types.kind
                )));
            }

            let resource = self.cluster.discovery.resolve(&gvk_from_type_meta(&types)).await?;

            let namespace = resource.namespaced.then(|| {
                obj.metadata
                    .namespace
                    .clone()
                    .filter(|ns| !ns.is_empty())
                    .unwrap_or_else(|| module.effective_namespace().to_string())
            });
            obj.metadata.namespace = namespace.clone();
            add_ownership_labels(&mut obj, &module.name);

            objects.push(ParsedObject {
                obj,
                resource,
                namespace,
            });
        }

        Ok(objects)
    }

    /// Apply every object of `manifest`, collecting per-object failures
    pub async fn apply(&self, module: &Module, manifest: &str) -> Result<ApplyReport> {
        let objects = self.parse_manifest(module, manifest).await?;
        Ok(self.apply_objects(&objects).await)
    }

    /// Apply already parsed objects
    pub async fn apply_objects(&self, objects: &[ParsedObject]) -> ApplyReport {
        let mut report = ApplyReport::default();

        for parsed in objects {
            let managed = parsed.managed_resource();
            match self.apply_object(parsed).await {
                Ok(true) => {
                    tracing::info!(resource = %managed, "created");
                    report.created.push(managed);
                }
                Ok(false) => {
                    tracing::debug!(resource = %managed, "updated");
                    report.updated.push(managed);
                }
                Err(e) => {
                    tracing::warn!(resource = %managed, error = %e, "apply failed");
                    report.failures.push(ApplyFailure {
                        resource: managed,
                        message: e.to_string(),
                    });
                }
            }
        }

        report
    }

    /// Returns true when the object was created
    async fn apply_object(&self, parsed: &ParsedObject) -> Result<bool> {
        let ar = &parsed.resource.api_resource;
        let ns = parsed.namespace.as_deref();

        if self.cluster.client.get(ar, ns, parsed.name()).await?.is_none() {
            self.cluster.client.create(ar, ns, &parsed.obj).await?;
            return Ok(true);
        }

        RetryIf::spawn(
            conflict_backoff(self.config),
            || self.update_object(parsed),
            |e: &KubeError| {
                if e.is_conflict() {
                    tracing::debug!(resource = %parsed.managed_resource(), "update conflicted, retrying");
                }
                e.is_conflict()
            },
        )
        .await?;
        Ok(false)
    }

    /// Single update attempt against the live object
    async fn update_object(&self, parsed: &ParsedObject) -> Result<()> {
        let ar = &parsed.resource.api_resource;
        let ns = parsed.namespace.as_deref();

        let live = self.cluster.client.get(ar, ns, parsed.name()).await?.ok_or_else(|| {
            KubeError::api_status(
                404,
                "NotFound",
                format!("{} \"{}\" disappeared during apply", ar.plural, parsed.name()),
            )
        })?;

        let mut desired = parsed.obj.clone();
        merge_existing(&mut desired, &live);
        self.cluster.client.update(ar, ns, &desired).await?;
        Ok(())
    }
}

/// Delays between conflict retries: `retry_backoff`, then doubling
fn conflict_backoff(config: &ApplyConfig) -> impl Iterator<Item = Duration> {
    let initial = u64::try_from(config.retry_backoff.as_millis()).unwrap_or(u64::MAX);
    // from_millis(2) doubles each step; factor scales the first delay
    ExponentialBackoff::from_millis(2)
        .factor((initial / 2).max(1))
        .max_delay(MAX_RETRY_DELAY)
        .take(config.conflict_retries)
}

fn add_ownership_labels(obj: &mut DynamicObject, module: &str) {
    let labels = obj.metadata.labels.get_or_insert_with(BTreeMap::new);
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(MODULE_LABEL.to_string(), module.to_string());
}

/// Carry cluster-owned state from `live` into `desired`
///
/// - `resourceVersion` and finalizers come from the live object
/// - annotations are merged, desired values winning
/// - Jobs keep their generated selector and pod template labels
/// - PersistentVolumeClaims keep their spec; only the requested storage size
///   is taken from the desired object
pub fn merge_existing(desired: &mut DynamicObject, live: &DynamicObject) {
    desired.metadata.resource_version = live.metadata.resource_version.clone();
    if live.metadata.finalizers.is_some() {
        desired.metadata.finalizers = live.metadata.finalizers.clone();
    }

    if let Some(existing) = &live.metadata.annotations {
        let mut merged = existing.clone();
        merged.extend(desired.metadata.annotations.take().unwrap_or_default());
        desired.metadata.annotations = Some(merged);
    }

    let (group, kind) = match desired.types.as_ref() {
        Some(types) => {
            let gvk = gvk_from_type_meta(types);
            (gvk.group, gvk.kind)
        }
        None => return,
    };

    match (group.as_str(), kind.as_str()) {
        ("batch", "Job") => {
            for path in [&["spec", "selector"][..], &["spec", "template", "metadata", "labels"][..]] {
                if let Some(value) = get_path(&live.data, path) {
                    set_path(&mut desired.data, path, value.clone());
                }
            }
        }
        ("", "PersistentVolumeClaim") => {
            let Some(spec) = live.data.get("spec") else {
                return;
            };
            let storage_path = ["spec", "resources", "requests", "storage"];
            let storage = get_path(&desired.data, &storage_path).cloned();

            set_path(&mut desired.data, &["spec"], spec.clone());
            if let Some(storage) = storage {
                set_path(&mut desired.data, &storage_path, storage);
            }
        }
        _ => {}
    }
}

fn get_path<'v>(root: &'v Value, path: &[&str]) -> Option<&'v Value> {
    path.iter().try_fold(root, |cursor, key| cursor.get(key))
}

fn set_path(root: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut cursor = root;
    for key in parents {
        let Some(map) = cursor.as_object_mut() else {
            return;
        };
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        if !entry.is_object() {
            *entry = Value::Object(Default::default());
        }
        cursor = entry;
    }

    if let Some(map) = cursor.as_object_mut() {
        map.insert(last.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCluster;
    use serde_json::json;
    use std::sync::Arc;
    use stencil_core::ModuleSpec;

    const MANIFEST: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 2
---
apiVersion: v1
kind: Service
metadata:
  name: web
  namespace: edge
spec:
  ports:
    - port: 80
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: web-reader
  namespace: ignored
rules: []
"#;

    fn module() -> Module {
        Module {
            name: "web".into(),
            namespace: "stencil".into(),
            spec: ModuleSpec {
                target_namespace: Some("apps".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn fast_retries(retries: usize) -> ApplyConfig {
        ApplyConfig {
            conflict_retries: retries,
            retry_backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn object(value: serde_json::Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_apply_creates_then_updates() {
        let mock = Arc::new(MockCluster::new());
        let cluster = ClusterContext::from_cluster(mock.clone());
        let config = fast_retries(3);
        let applier = Applier::new(&cluster, &config);

        let first = applier.apply(&module(), MANIFEST).await.unwrap();
        assert_eq!(first.created.len(), 3);
        assert_eq!(first.summary(), "3 created");

        let deploy = mock.find("Deployment", "apps", "web").unwrap();
        let labels = deploy.metadata.labels.unwrap();
        assert_eq!(labels[MANAGED_BY_LABEL], "stencil");
        assert_eq!(labels[MODULE_LABEL], "web");

        assert!(mock.find("Service", "edge", "web").is_some());
        let role = mock.find("ClusterRole", "", "web-reader").unwrap();
        assert!(role.metadata.namespace.is_none());

        let second = applier.apply(&module(), MANIFEST).await.unwrap();
        assert_eq!(second.updated.len(), 3);
        assert!(second.created.is_empty());
        assert_eq!(mock.objects_of_kind("Deployment").len(), 1);

        let deploy = mock.find("Deployment", "apps", "web").unwrap();
        assert_eq!(deploy.metadata.generation, Some(1));
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let mock = Arc::new(MockCluster::new());
        let cluster = ClusterContext::from_cluster(mock.clone());
        let config = fast_retries(3);
        let applier = Applier::new(&cluster, &config);

        applier.apply(&module(), MANIFEST).await.unwrap();
        mock.inject_conflicts("web-reader", 2);
        let before = mock.operation_counts().updates;

        let report = applier.apply(&module(), MANIFEST).await.unwrap();
        assert!(report.is_success());
        assert_eq!(mock.operation_counts().updates - before, 5);
    }

    #[tokio::test]
    async fn test_failing_object_does_not_stop_batch() {
        let mock = Arc::new(MockCluster::new());
        let cluster = ClusterContext::from_cluster(mock.clone());
        let config = fast_retries(0);
        let applier = Applier::new(&cluster, &config);

        applier.apply(&module(), MANIFEST).await.unwrap();
        mock.inject_conflicts("web-reader", 1);

        let report = applier.apply(&module(), MANIFEST).await.unwrap();
        assert_eq!(report.updated.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].resource.kind, "ClusterRole");
        assert_eq!(report.summary(), "2 updated, 1 failed");

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, KubeError::Apply { ref failures } if failures.len() == 1));
    }

    #[tokio::test]
    async fn test_unknown_kind_fails_before_writing() {
        let mock = Arc::new(MockCluster::new());
        let cluster = ClusterContext::from_cluster(mock.clone());
        let config = ApplyConfig::default();
        let applier = Applier::new(&cluster, &config);

        let manifest = format!("{}\n---\napiVersion: example.com/v1\nkind: Widget\nmetadata:\n  name: w\n", MANIFEST);
        let err = applier.apply(&module(), &manifest).await.unwrap_err();

        assert!(matches!(err, KubeError::Discovery { .. }));
        assert_eq!(mock.operation_counts().creates, 0);
    }

    #[tokio::test]
    async fn test_unnamed_document_rejected() {
        let mock = Arc::new(MockCluster::new());
        let cluster = ClusterContext::from_cluster(mock);
        let config = ApplyConfig::default();
        let applier = Applier::new(&cluster, &config);

        let err = applier
            .apply(&module(), "apiVersion: v1\nkind: ConfigMap\nmetadata: {}\n")
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::InvalidManifest(_)));
    }

    #[test]
    fn test_merge_carries_cluster_state() {
        let live = object(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "cfg",
                "resourceVersion": "42",
                "finalizers": ["example.com/guard"],
                "annotations": {"keep": "live", "shared": "old"}
            },
            "data": {"a": "1"}
        }));
        let mut desired = object(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "cfg", "annotations": {"shared": "new"}},
            "data": {"a": "2"}
        }));

        merge_existing(&mut desired, &live);

        assert_eq!(desired.metadata.resource_version.as_deref(), Some("42"));
        assert_eq!(desired.metadata.finalizers, Some(vec!["example.com/guard".to_string()]));
        let annotations = desired.metadata.annotations.unwrap();
        assert_eq!(annotations["keep"], "live");
        assert_eq!(annotations["shared"], "new");
        assert_eq!(desired.data["data"]["a"], "2");
    }

    #[test]
    fn test_merge_keeps_job_selector() {
        let live = object(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {"name": "migrate"},
            "spec": {
                "selector": {"matchLabels": {"controller-uid": "abc"}},
                "template": {"metadata": {"labels": {"controller-uid": "abc", "job-name": "migrate"}}}
            }
        }));
        let mut desired = object(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {"name": "migrate"},
            "spec": {"template": {"spec": {"restartPolicy": "Never"}}}
        }));

        merge_existing(&mut desired, &live);

        assert_eq!(desired.data["spec"]["selector"]["matchLabels"]["controller-uid"], "abc");
        assert_eq!(desired.data["spec"]["template"]["metadata"]["labels"]["job-name"], "migrate");
        assert_eq!(desired.data["spec"]["template"]["spec"]["restartPolicy"], "Never");
    }

    #[test]
    fn test_merge_keeps_pvc_spec_except_storage() {
        let live = object(json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {"name": "data"},
            "spec": {
                "volumeName": "pv-123",
                "storageClassName": "fast",
                "accessModes": ["ReadWriteOnce"],
                "resources": {"requests": {"storage": "1Gi"}}
            }
        }));
        let mut desired = object(json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {"name": "data"},
            "spec": {
                "storageClassName": "slow",
                "accessModes": ["ReadWriteOnce"],
                "resources": {"requests": {"storage": "5Gi"}}
            }
        }));

        merge_existing(&mut desired, &live);

        let spec = &desired.data["spec"];
        assert_eq!(spec["volumeName"], "pv-123");
        assert_eq!(spec["storageClassName"], "fast");
        assert_eq!(spec["resources"]["requests"]["storage"], "5Gi");
    }

    #[test]
    fn test_conflict_backoff_schedule() {
        let config = ApplyConfig::default();
        let delays: Vec<Duration> = conflict_backoff(&config).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800)
            ]
        );

        let disabled = ApplyConfig {
            conflict_retries: 0,
            ..Default::default()
        };
        assert_eq!(conflict_backoff(&disabled).count(), 0);
    }

    #[test]
    fn test_ownership_selector() {
        assert_eq!(
            ownership_selector("web"),
            "app.kubernetes.io/managed-by=stencil,stencil.dev/module=web"
        );
    }
}
