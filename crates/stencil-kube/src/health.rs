//! Module health
//!
//! Health is derived on demand from the workloads a module owns, found by
//! the ownership label. Kinds are inspected in a fixed order and the first
//! object that isn't healthy decides the result.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::DynamicObject;
use kube::core::{GroupVersionKind, TypeMeta};
use serde::de::DeserializeOwned;

use stencil_core::HealthStatus;

use crate::apply::ownership_selector;
use crate::cluster::ClusterContext;
use crate::error::Result;

/// Deployment condition reason once the rollout has finished
const ROLLOUT_COMPLETE_REASON: &str = "NewReplicaSetAvailable";

/// Kinds inspected, in order
const HEALTH_KINDS: [(&str, &str, &str); 5] = [
    ("apps", "v1", "Deployment"),
    ("apps", "v1", "StatefulSet"),
    ("apps", "v1", "DaemonSet"),
    ("", "v1", "PersistentVolumeClaim"),
    ("", "v1", "Pod"),
];

/// Deployment health
///
/// - Progressing while the `Progressing` condition is `True` with any reason
///   other than `NewReplicaSetAvailable`
/// - Unhealthy when the controller hasn't observed the latest generation,
///   when updated replicas differ from desired, or when any replica is
///   unavailable
pub fn deployment_health(deployment: &Deployment) -> HealthStatus {
    let status = deployment.status.clone().unwrap_or_default();

    let rolling_out = status.conditions.iter().flatten().any(|c| {
        c.type_ == "Progressing" && c.status == "True" && c.reason.as_deref() != Some(ROLLOUT_COMPLETE_REASON)
    });
    if rolling_out {
        return HealthStatus::Progressing;
    }

    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    if deployment.metadata.generation != status.observed_generation
        || status.updated_replicas.unwrap_or(0) != desired
        || status.unavailable_replicas.unwrap_or(0) > 0
    {
        return HealthStatus::Unhealthy;
    }

    HealthStatus::Healthy
}

/// StatefulSet health
pub fn statefulset_health(sts: &StatefulSet) -> HealthStatus {
    let status = sts.status.clone().unwrap_or_default();

    let rolling_out = matches!(
        (&status.current_revision, &status.update_revision),
        (Some(current), Some(update)) if current != update
    );
    if rolling_out {
        return HealthStatus::Progressing;
    }

    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    if sts.metadata.generation != status.observed_generation || status.ready_replicas.unwrap_or(0) != desired {
        return HealthStatus::Unhealthy;
    }

    HealthStatus::Healthy
}

/// DaemonSet health
pub fn daemonset_health(ds: &DaemonSet) -> HealthStatus {
    let Some(status) = ds.status.as_ref() else {
        return HealthStatus::Unhealthy;
    };

    let healthy = ds.metadata.generation == status.observed_generation
        && status.current_number_scheduled == status.desired_number_scheduled
        && status.number_unavailable.unwrap_or(0) == 0;

    if healthy {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    }
}

/// Healthy only once bound
pub fn pvc_health(pvc: &PersistentVolumeClaim) -> HealthStatus {
    let phase = pvc.status.as_ref().and_then(|s| s.phase.as_deref());
    if phase == Some("Bound") {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    }
}

/// Unhealthy unless every container is running
///
/// Pods that ran to completion are not held against the module.
pub fn pod_health(pod: &Pod) -> HealthStatus {
    let Some(status) = pod.status.as_ref() else {
        return HealthStatus::Unhealthy;
    };
    if status.phase.as_deref() == Some("Succeeded") {
        return HealthStatus::Healthy;
    }

    let containers = status.container_statuses.as_deref().unwrap_or_default();
    let all_running = !containers.is_empty()
        && containers
            .iter()
            .all(|c| c.state.as_ref().is_some_and(|s| s.running.is_some()));

    if all_running {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    }
}

/// Health of a single owned object
pub fn object_health(kind: &str, obj: DynamicObject) -> Result<HealthStatus> {
    let health = match kind {
        "Deployment" => deployment_health(&typed::<Deployment>(obj)?),
        "StatefulSet" => statefulset_health(&typed::<StatefulSet>(obj)?),
        "DaemonSet" => daemonset_health(&typed::<DaemonSet>(obj)?),
        "PersistentVolumeClaim" => pvc_health(&typed::<PersistentVolumeClaim>(obj)?),
        "Pod" => pod_health(&typed::<Pod>(obj)?),
        _ => HealthStatus::Healthy,
    };
    Ok(health)
}

fn typed<K>(mut obj: DynamicObject) -> Result<K>
where
    K: k8s_openapi::Resource + DeserializeOwned,
{
    // list items come back without apiVersion/kind
    obj.types = Some(TypeMeta {
        api_version: K::API_VERSION.to_string(),
        kind: K::KIND.to_string(),
    });
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Aggregates health across a module's workloads
pub struct HealthChecker<'a> {
    cluster: &'a ClusterContext,
}

impl<'a> HealthChecker<'a> {
    pub fn new(cluster: &'a ClusterContext) -> Self {
        Self { cluster }
    }

    /// Health of every workload owned by `module`
    ///
    /// `Unknown` when the module owns none of the inspected kinds.
    pub async fn check(&self, module: &str) -> Result<HealthStatus> {
        let selector = ownership_selector(module);
        let mut found = 0usize;

        for (group, version, kind) in HEALTH_KINDS {
            let resource = self
                .cluster
                .discovery
                .resolve(&GroupVersionKind::gvk(group, version, kind))
                .await?;
            let objects = self
                .cluster
                .client
                .list(&resource.api_resource, None, &selector)
                .await?;

            for obj in objects {
                found += 1;
                let name = obj.metadata.name.clone().unwrap_or_default();
                let health = object_health(kind, obj)?;
                if health != HealthStatus::Healthy {
                    tracing::debug!(%module, %kind, %name, %health, "module not healthy");
                    return Ok(health);
                }
            }
        }

        if found == 0 {
            Ok(HealthStatus::Unknown)
        } else {
            Ok(HealthStatus::Healthy)
        }
    }
}
