//! Deletion diff
//!
//! Compares what a module owns in the cluster with what its latest manifest
//! declares. Objects that dropped out of the manifest are flagged
//! `deleted` and left for [`prune`](crate::Reconciler::prune) to remove.

use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use std::collections::{BTreeMap, BTreeSet};

use stencil_core::{ManagedResource, split_documents};

use crate::cluster::gvk_from_type_meta;
use crate::error::{KubeError, Result};

/// Objects declared by a manifest, grouped by kind
#[derive(Debug, Clone, Default)]
pub struct DesiredIndex {
    objects: BTreeMap<String, BTreeSet<(String, String)>>,
    kinds: BTreeMap<String, GroupVersionKind>,
}

impl DesiredIndex {
    /// Index `manifest`, placing objects without a namespace in `default_namespace`
    pub fn from_manifest(manifest: &str, default_namespace: &str) -> Result<Self> {
        let mut index = Self::default();

        for (i, doc) in split_documents(manifest).into_iter().enumerate() {
            let obj: DynamicObject = serde_yaml::from_str(doc)
                .map_err(|e| KubeError::InvalidManifest(format!("document {}: {}", i, e)))?;
            let Some(types) = obj.types.as_ref() else {
                continue;
            };
            let name = obj.metadata.name.clone().unwrap_or_default();
            let namespace = obj
                .metadata
                .namespace
                .clone()
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| default_namespace.to_string());

            index.insert(gvk_from_type_meta(types), name, namespace);
        }

        Ok(index)
    }

    pub fn insert(&mut self, gvk: GroupVersionKind, name: String, namespace: String) {
        self.objects
            .entry(gvk.kind.clone())
            .or_default()
            .insert((name, namespace));
        self.kinds.entry(gvk.kind.clone()).or_insert(gvk);
    }

    /// Whether the manifest declares this object
    ///
    /// Cluster-scoped objects carry no namespace and match on name alone.
    pub fn contains(&self, resource: &ManagedResource) -> bool {
        let Some(objects) = self.objects.get(&resource.kind) else {
            return false;
        };
        if resource.namespace.is_empty() {
            objects.iter().any(|(name, _)| name == &resource.name)
        } else {
            objects.contains(&(resource.name.clone(), resource.namespace.clone()))
        }
    }

    /// Kinds declared by the manifest
    pub fn kinds(&self) -> impl Iterator<Item = &GroupVersionKind> {
        self.kinds.values()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Flag every resource the manifest no longer declares
///
/// The full set is returned, sorted, with `deleted` recomputed.
pub fn mark_deleted(resources: impl IntoIterator<Item = ManagedResource>, desired: &DesiredIndex) -> Vec<ManagedResource> {
    let mut marked: Vec<ManagedResource> = resources
        .into_iter()
        .map(|mut r| {
            r.deleted = !desired.contains(&r);
            r
        })
        .collect();
    marked.sort();
    marked.dedup();
    marked
}
