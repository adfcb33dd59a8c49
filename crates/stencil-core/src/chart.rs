//! Chart metadata (`Chart.yaml`)

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};
use crate::values::Values;

/// Chart type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[default]
    Application,
    Library,
}

/// Contents of `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart API version (`v1` or `v2`)
    #[serde(default = "default_api_version")]
    pub api_version: String,

    pub name: String,

    #[serde(with = "version_serde")]
    pub version: Version,

    #[serde(default, rename = "type")]
    pub chart_type: ChartType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default)]
    pub sources: Vec<String>,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub maintainers: Vec<Maintainer>,

    #[serde(default)]
    pub dependencies: Vec<ChartDependency>,

    #[serde(default)]
    pub deprecated: bool,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

fn default_api_version() -> String {
    "v2".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Maintainer {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl ChartMetadata {
    /// Parse `Chart.yaml` bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let meta: ChartMetadata = serde_yaml::from_slice(bytes).map_err(|e| {
            CoreError::malformed(
                format!("Chart.yaml is invalid: {}", e),
                "Chart.yaml must define at least `name` and a SemVer `version`",
            )
        })?;
        if meta.name.trim().is_empty() {
            return Err(CoreError::malformed(
                "Chart.yaml has an empty name",
                "set `name` in Chart.yaml",
            ));
        }
        Ok(meta)
    }

    pub fn is_library(&self) -> bool {
        self.chart_type == ChartType::Library
    }
}

/// A dependency declared in `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDependency {
    pub name: String,

    /// Version constraint (semver range or exact version)
    #[serde(default)]
    pub version: String,

    /// Repository URL; empty when the chart is vendored under `charts/`
    #[serde(default)]
    pub repository: String,

    /// Dotted path into the root values that must be boolean `true`
    ///
    /// Several comma-separated paths may be given; the first one that
    /// resolves to a boolean decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ChartDependency {
    /// Get the effective name (alias if set, otherwise name)
    #[inline]
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Evaluate a dependency condition against the top-level values
///
/// `None` means unconditional. A missing path or a non-boolean value
/// excludes the dependency.
pub fn condition_holds(condition: Option<&str>, values: &Values) -> bool {
    let Some(condition) = condition.map(str::trim).filter(|c| !c.is_empty()) else {
        return true;
    };

    condition
        .split(',')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .find_map(|path| values.get_bool(path).ok())
        .unwrap_or(false)
}

/// Custom serde for semver::Version
mod version_serde {
    use semver::Version;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(version: &Version, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&version.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Version, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Version::parse(s.trim_start_matches('v')).map_err(serde::de::Error::custom)
    }
}
