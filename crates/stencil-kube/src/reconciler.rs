//! Module reconciler
//!
//! One pass takes a module from its template reference to applied cluster
//! objects: resolve, load, render, apply, then record the outcome through
//! the [`ModuleStatusWriter`]. A failure at any step replaces the recorded
//! status with `failed` and the error text. Health is computed separately,
//! on demand, and never moves the module between states.

use dashmap::DashMap;
use kube::core::GroupVersionKind;
use std::collections::BTreeMap;
use std::sync::Arc;

use stencil_core::config::{ApplyConfig, StencilConfig};
use stencil_core::{Capabilities, HealthStatus, ManagedResource, Module, ModuleStatus, ResourceRef, TemplateRef};
use stencil_engine::RenderEngine;
use stencil_repo::TemplateService;

use crate::apply::{ApplyReport, Applier, ownership_selector};
use crate::cluster::{ClusterContext, DiscoveredResource};
use crate::diff::{DesiredIndex, mark_deleted};
use crate::error::{ApplyFailure, KubeError, Result};
use crate::health::HealthChecker;
use crate::status::ModuleStatusWriter;

/// Kinds always searched for owned objects, on top of the ones the module
/// is known to use
const WELL_KNOWN_KINDS: &[(&str, &str, &str)] = &[
    ("apps", "v1", "Deployment"),
    ("apps", "v1", "StatefulSet"),
    ("apps", "v1", "DaemonSet"),
    ("batch", "v1", "Job"),
    ("", "v1", "Service"),
    ("", "v1", "ConfigMap"),
    ("", "v1", "Secret"),
    ("", "v1", "ServiceAccount"),
    ("", "v1", "PersistentVolumeClaim"),
    ("networking.k8s.io", "v1", "Ingress"),
];

/// group, kind
type KindKey = (String, String);

fn kind_key(resource: &DiscoveredResource) -> KindKey {
    (
        resource.api_resource.group.clone(),
        resource.api_resource.kind.clone(),
    )
}

fn module_key(module: &Module) -> String {
    format!("{}/{}", module.namespace, module.name)
}

/// Drives modules to their desired state
pub struct Reconciler {
    templates: TemplateService,
    renderer: RenderEngine,
    cluster: ClusterContext,
    status_writer: Arc<dyn ModuleStatusWriter>,
    config: ApplyConfig,
    /// Kinds each module has been seen to own
    kinds: DashMap<String, BTreeMap<KindKey, DiscoveredResource>>,
}

impl Reconciler {
    pub fn new(
        templates: TemplateService,
        renderer: RenderEngine,
        cluster: ClusterContext,
        status_writer: Arc<dyn ModuleStatusWriter>,
        config: ApplyConfig,
    ) -> Self {
        Self {
            templates,
            renderer,
            cluster,
            status_writer,
            config,
            kinds: DashMap::new(),
        }
    }

    /// Build a reconciler whose render capabilities match the cluster
    pub async fn connect(
        templates: TemplateService,
        cluster: ClusterContext,
        status_writer: Arc<dyn ModuleStatusWriter>,
        config: &StencilConfig,
    ) -> Result<Self> {
        let version = cluster.version.server_version().await?;
        tracing::debug!(%version, "connected to cluster");

        let capabilities = Capabilities::new(&version, &config.render.templating_version);
        let renderer = RenderEngine::new(&config.render, capabilities);
        Ok(Self::new(templates, renderer, cluster, status_writer, config.apply.clone()))
    }

    pub fn templates(&self) -> &TemplateService {
        &self.templates
    }

    pub fn cluster(&self) -> &ClusterContext {
        &self.cluster
    }

    /// Resolve, load and render a module's template
    ///
    /// Returns the pinned reference alongside the manifest.
    pub async fn render(&self, module: &Module) -> Result<(TemplateRef, String)> {
        let resolved = self.templates.resolve(&module.spec.template_ref).await?;
        let template = self.templates.get_template(&resolved).await?;
        let manifest = self.renderer.render_manifest(module, &template)?;
        Ok((resolved, manifest))
    }

    /// Run one reconciliation pass and record its outcome
    pub async fn reconcile(&self, module: &Module) -> Result<ModuleStatus> {
        tracing::info!(
            module = %module.name,
            reference = %module.spec.template_ref.display_name(),
            "reconciling module"
        );

        let mut resolved_version = None;
        let outcome = self.run_pass(module, &mut resolved_version).await;
        let status = match &outcome {
            Ok(status) => status.clone(),
            Err(e) => ModuleStatus::failed(&module.status, resolved_version, e.to_string()),
        };

        if let Err(write_err) = self.status_writer.write_status(module, &status).await {
            return match outcome {
                Ok(_) => Err(write_err),
                Err(e) => {
                    tracing::warn!(module = %module.name, error = %write_err, "could not record failed status");
                    Err(e)
                }
            };
        }

        match outcome {
            Ok(status) => {
                tracing::info!(module = %module.name, state = %status.reconciliation_status.state, "reconciled module");
                Ok(status)
            }
            Err(e) => {
                tracing::warn!(module = %module.name, error = %e, "reconciliation failed");
                Err(e)
            }
        }
    }

    async fn run_pass(&self, module: &Module, resolved_version: &mut Option<String>) -> Result<ModuleStatus> {
        let resolved = self.templates.resolve(&module.spec.template_ref).await?;
        resolved_version.clone_from(&resolved.resolved_version);

        let template = self.templates.get_template(&resolved).await?;
        let manifest = self.renderer.render_manifest(module, &template)?;

        let report = self.apply_manifest(module, &manifest).await?;
        let (_, refs) = self.collect_managed(module, Some(&manifest)).await?;
        report.into_result()?;

        Ok(ModuleStatus::succeeded(resolved.resolved_version.clone(), refs))
    }

    async fn apply_manifest(&self, module: &Module, manifest: &str) -> Result<ApplyReport> {
        let applier = Applier::new(&self.cluster, &self.config);
        let objects = applier.parse_manifest(module, manifest).await?;
        self.remember_kinds(module, objects.iter().map(|o| &o.resource));

        let report = applier.apply_objects(&objects).await;
        tracing::info!(module = %module.name, summary = %report.summary(), "applied manifest");
        Ok(report)
    }

    /// Apply a rendered manifest, failing when any object was rejected
    pub async fn apply_module(&self, module: &Module, manifest: &str) -> Result<ApplyReport> {
        self.apply_manifest(module, manifest).await?.into_result()
    }

    /// Objects owned by `module`
    ///
    /// With a manifest, objects it no longer declares are flagged `deleted`;
    /// without one every owned object is reported as current.
    pub async fn get_managed_resources(&self, module: &Module, manifest: Option<&str>) -> Result<Vec<ManagedResource>> {
        let (resources, _) = self.collect_managed(module, manifest).await?;
        Ok(resources)
    }

    async fn collect_managed(
        &self,
        module: &Module,
        manifest: Option<&str>,
    ) -> Result<(Vec<ManagedResource>, Vec<ResourceRef>)> {
        let desired = match manifest {
            Some(m) => DesiredIndex::from_manifest(m, module.effective_namespace())?,
            None => DesiredIndex::default(),
        };

        let kinds = self.candidate_kinds(module, &desired).await?;
        let selector = ownership_selector(&module.name);
        let mut found = Vec::new();
        let mut owned_kinds = Vec::new();

        for resource in kinds.values() {
            let ar = &resource.api_resource;
            let objects = self.cluster.client.list(ar, None, &selector).await?;
            if objects.is_empty() {
                continue;
            }
            owned_kinds.push(resource.clone());

            found.extend(objects.into_iter().map(|obj| ManagedResource {
                group: ar.group.clone(),
                version: ar.version.clone(),
                kind: ar.kind.clone(),
                name: obj.metadata.name.unwrap_or_default(),
                namespace: if resource.namespaced {
                    obj.metadata.namespace.unwrap_or_default()
                } else {
                    String::new()
                },
                deleted: false,
            }));
        }

        self.remember_kinds(module, owned_kinds.iter());
        let refs = owned_kinds.iter().map(DiscoveredResource::resource_ref).collect();

        let resources = if manifest.is_some() {
            mark_deleted(found, &desired)
        } else {
            found.sort();
            found
        };
        Ok((resources, refs))
    }

    /// Union of manifest kinds, remembered kinds, recorded refs and the
    /// well-known kinds
    async fn candidate_kinds(&self, module: &Module, desired: &DesiredIndex) -> Result<BTreeMap<KindKey, DiscoveredResource>> {
        let mut kinds = BTreeMap::new();

        for gvk in desired.kinds() {
            let resource = self.cluster.discovery.resolve(gvk).await?;
            kinds.insert(kind_key(&resource), resource);
        }

        if let Some(remembered) = self.kinds.get(&module_key(module)) {
            for (key, resource) in remembered.iter() {
                kinds.entry(key.clone()).or_insert_with(|| resource.clone());
            }
        }

        for resource_ref in &module.status.managed_resource_refs {
            match self.cluster.discovery.resolve_ref(resource_ref).await {
                Ok(resource) => {
                    kinds.entry(kind_key(&resource)).or_insert(resource);
                }
                Err(e) => {
                    tracing::debug!(resource = %resource_ref.resource, error = %e, "recorded kind no longer served");
                }
            }
        }

        for (group, version, kind) in WELL_KNOWN_KINDS {
            if kinds.keys().any(|(g, k)| g == group && k == kind) {
                continue;
            }
            if let Ok(resource) = self
                .cluster
                .discovery
                .resolve(&GroupVersionKind::gvk(group, version, kind))
                .await
            {
                kinds.insert(kind_key(&resource), resource);
            }
        }

        Ok(kinds)
    }

    fn remember_kinds<'r>(&self, module: &Module, resources: impl Iterator<Item = &'r DiscoveredResource>) {
        let mut entry = self.kinds.entry(module_key(module)).or_default();
        for resource in resources {
            entry.insert(kind_key(resource), resource.clone());
        }
    }

    /// Aggregate health of the workloads owned by `module_name`
    pub async fn get_module_health(&self, module_name: &str) -> Result<HealthStatus> {
        HealthChecker::new(&self.cluster).check(module_name).await
    }

    /// Delete owned objects that `manifest` no longer declares
    ///
    /// Returns the deleted objects.
    pub async fn prune(&self, module: &Module, manifest: &str) -> Result<Vec<ManagedResource>> {
        let resources = self.get_managed_resources(module, Some(manifest)).await?;
        let mut pruned = Vec::new();
        let mut failures = Vec::new();

        for resource in resources.into_iter().filter(|r| r.deleted) {
            let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
            let namespace = (!resource.namespace.is_empty()).then_some(resource.namespace.as_str());

            let outcome = match self.cluster.discovery.resolve(&gvk).await {
                Ok(found) => {
                    self.cluster
                        .client
                        .delete(&found.api_resource, namespace, &resource.name)
                        .await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    tracing::info!(resource = %resource, "pruned");
                    pruned.push(resource);
                }
                Err(e) => {
                    tracing::warn!(resource = %resource, error = %e, "prune failed");
                    failures.push(ApplyFailure {
                        resource,
                        message: e.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(pruned)
        } else {
            Err(KubeError::Prune { failures })
        }
    }
}
