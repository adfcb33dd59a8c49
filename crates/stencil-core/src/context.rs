//! Synthetic render context: release and cluster capabilities
//!
//! Field names serialize in Helm's PascalCase so charts written against
//! `Release.Name` or `Capabilities.KubeVersion.Version` keep working.

use serde::{Deserialize, Serialize};

use crate::chart::ChartMetadata;

/// Release information for templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReleaseInfo {
    /// Module name
    pub name: String,

    /// Effective namespace
    pub namespace: String,

    pub revision: u32,

    pub is_install: bool,

    pub is_upgrade: bool,

    /// Always "Stencil"
    pub service: String,
}

impl ReleaseInfo {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision: 1,
            is_install: true,
            is_upgrade: false,
            service: "Stencil".to_string(),
        }
    }
}

/// Chart information for templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChartInfo {
    pub name: String,
    pub version: String,
    pub app_version: Option<String>,
    pub description: Option<String>,
}

impl From<&ChartMetadata> for ChartInfo {
    fn from(meta: &ChartMetadata) -> Self {
        Self {
            name: meta.name.clone(),
            version: meta.version.to_string(),
            app_version: meta.app_version.clone(),
            description: meta.description.clone(),
        }
    }
}

/// Cluster capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(rename = "KubeVersion")]
    pub kube_version: KubeVersion,

    /// Templating semantics marker, fixed per installation
    #[serde(rename = "HelmVersion")]
    pub helm_version: HelmVersion,

    #[serde(rename = "APIVersions")]
    pub api_versions: Vec<String>,
}

impl Capabilities {
    pub fn new(kube_version: &str, templating_version: &str) -> Self {
        Self {
            kube_version: KubeVersion::new(kube_version),
            helm_version: HelmVersion {
                version: templating_version.to_string(),
            },
            api_versions: Vec::new(),
        }
    }

    pub fn with_api_versions(mut self, api_versions: Vec<String>) -> Self {
        self.api_versions = api_versions;
        self
    }
}

/// Kubernetes version info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KubeVersion {
    pub version: String,
    pub major: String,
    pub minor: String,
}

impl Default for KubeVersion {
    fn default() -> Self {
        Self::new("v1.31.0")
    }
}

impl KubeVersion {
    /// Parse `v1.29.3`, `1.29` or `v1.29.3-gke.100` style versions
    pub fn new(version: &str) -> Self {
        let version = version.trim().trim_start_matches('v');
        let mut parts = version.split(['.', '-', '+']);
        let major = parts.next().filter(|s| !s.is_empty()).unwrap_or("1");
        // GKE/EKS report minors like "29+"
        let minor = parts
            .next()
            .map(|m| m.trim_end_matches('+'))
            .filter(|s| !s.is_empty())
            .unwrap_or("0");

        Self {
            version: format!("v{}", version),
            major: major.to_string(),
            minor: minor.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HelmVersion {
    pub version: String,
}

impl Default for HelmVersion {
    fn default() -> Self {
        Self {
            version: "v3.14.0".to_string(),
        }
    }
}
