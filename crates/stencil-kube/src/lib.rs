//! Stencil Kube - Kubernetes integration for Stencil
//!
//! This crate provides:
//! - **Apply**: Create-or-update of rendered objects with bounded conflict retries
//! - **Deletion Diff**: Owned objects a manifest no longer declares, and pruning them
//! - **Health Checks**: Aggregate workload health for a module
//! - **Reconciliation**: Resolve, render, apply and record a module's status
//! - **Mock Cluster**: In-memory cluster for tests and dry runs

pub mod apply;
pub mod cluster;
pub mod diff;
pub mod error;
pub mod health;
pub mod mock;
pub mod reconciler;
pub mod status;

pub use apply::{
    ApplyReport, Applier, MANAGED_BY_LABEL, MANAGED_BY_VALUE, MODULE_LABEL, ParsedObject,
    merge_existing, ownership_selector,
};
pub use cluster::{
    ClusterClient, ClusterContext, DiscoveredResource, KubeCluster, ResourceDiscovery,
    ServerVersionProvider,
};
pub use diff::{DesiredIndex, mark_deleted};
pub use error::{ApplyFailure, KubeError, Result};
pub use health::{HealthChecker, object_health};
pub use mock::{MockCluster, OperationCounts};
pub use reconciler::Reconciler;
pub use status::{InMemoryStatusWriter, KubeStatusWriter, ModuleStatusWriter};
