//! Module records and template references

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::values::Values;

/// Where a template bundle is fetched from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Git,
    Helm,
    Oci,
    Crd,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Git => "git",
            Self::Helm => "helm",
            Self::Oci => "oci",
            Self::Crd => "crd",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "git" => Ok(Self::Git),
            "helm" => Ok(Self::Helm),
            "oci" => Ok(Self::Oci),
            "crd" => Ok(Self::Crd),
            other => Err(format!(
                "unknown source type '{}' (expected git, helm, oci or crd)",
                other
            )),
        }
    }
}

/// User-supplied coordinate identifying a template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRef {
    /// Repository URL (Git remote, chart repository, `oci://` reference)
    #[serde(default)]
    pub url: String,

    /// Chart path inside a Git repository, or chart name in a chart repository
    #[serde(default)]
    pub path: String,

    /// Floating version spec: branch, tag, commit, semver constraint or empty
    #[serde(default)]
    pub version: String,

    /// Strict version, set once resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_version: Option<String>,

    /// Source type; `None` means classify by probing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,

    /// CustomResourceDefinition name for `crd` sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crd_name: Option<String>,
}

impl TemplateRef {
    /// Copy of this reference pinned to a strict version and source type
    pub fn resolved(&self, source_type: SourceType, version: impl Into<String>) -> Self {
        Self {
            resolved_version: Some(version.into()),
            source_type: Some(source_type),
            ..self.clone()
        }
    }

    /// Human readable coordinate for error messages and logs
    pub fn display_name(&self) -> String {
        if let Some(crd) = &self.crd_name {
            return format!("crd/{}", crd);
        }
        let mut s = self.url.clone();
        if !self.path.is_empty() {
            s.push_str("//");
            s.push_str(&self.path);
        }
        let version = self.resolved_version.as_deref().unwrap_or(&self.version);
        if !version.is_empty() {
            s.push('@');
            s.push_str(version);
        }
        s
    }
}

/// A deployed instantiation of a template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    pub spec: ModuleSpec,

    #[serde(default)]
    pub status: ModuleStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSpec {
    pub template_ref: TemplateRef,

    #[serde(default)]
    pub values: Values,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,
}

impl Module {
    /// Load a module from a YAML document
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Namespace objects land in when they don't name one
    ///
    /// Target namespace first, then `default`.
    pub fn effective_namespace(&self) -> &str {
        match self.spec.target_namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => "default",
        }
    }
}

/// Outcome of the last reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconciliationState {
    #[default]
    Unknown,
    Succeeded,
    Failed,
}

impl fmt::Display for ReconciliationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationStatus {
    #[serde(default)]
    pub state: ReconciliationState,

    #[serde(default)]
    pub reason: String,
}

/// Group/version/resource of a kind the module manages
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub resource: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStatus {
    #[serde(default)]
    pub reconciliation_status: ReconciliationStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_version: Option<String>,

    #[serde(default)]
    pub managed_resource_refs: Vec<ResourceRef>,
}

impl ModuleStatus {
    /// Status after a successful pass
    pub fn succeeded(resolved_version: Option<String>, refs: Vec<ResourceRef>) -> Self {
        Self {
            reconciliation_status: ReconciliationStatus {
                state: ReconciliationState::Succeeded,
                reason: String::new(),
            },
            resolved_version,
            managed_resource_refs: refs,
        }
    }

    /// Status after a failed pass
    ///
    /// Keeps the previously recorded resource refs so later passes still
    /// know which kinds to look at.
    pub fn failed(previous: &ModuleStatus, resolved_version: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            reconciliation_status: ReconciliationStatus {
                state: ReconciliationState::Failed,
                reason: reason.into(),
            },
            resolved_version: resolved_version.or_else(|| previous.resolved_version.clone()),
            managed_resource_refs: previous.managed_resource_refs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_deserialize() {
        let yaml = r#"
name: web
namespace: apps
spec:
  templateRef:
    url: https://github.com/example/charts.git
    path: charts/web
    version: main
    sourceType: git
  values:
    replicas: 2
  targetNamespace: web-prod
"#;
        let module = Module::from_yaml(yaml).unwrap();

        assert_eq!(module.name, "web");
        assert_eq!(module.spec.template_ref.source_type, Some(SourceType::Git));
        assert_eq!(module.spec.values.get("replicas").unwrap(), 2);
        assert_eq!(module.effective_namespace(), "web-prod");
        assert_eq!(
            module.status.reconciliation_status.state,
            ReconciliationState::Unknown
        );
    }

    #[test]
    fn test_effective_namespace_defaults() {
        let mut module = Module::default();
        assert_eq!(module.effective_namespace(), "default");

        module.spec.target_namespace = Some(String::new());
        assert_eq!(module.effective_namespace(), "default");
    }

    #[test]
    fn test_source_type_parse() {
        assert_eq!("OCI".parse::<SourceType>().unwrap(), SourceType::Oci);
        assert_eq!(SourceType::Helm.to_string(), "helm");
        assert!("svn".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_failed_status_overwrites_success() {
        let previous = ModuleStatus::succeeded(
            Some("1.2.0".into()),
            vec![ResourceRef {
                group: "apps".into(),
                version: "v1".into(),
                resource: "deployments".into(),
            }],
        );

        let failed = ModuleStatus::failed(&previous, None, "render failed");

        assert_eq!(failed.reconciliation_status.state, ReconciliationState::Failed);
        assert_eq!(failed.reconciliation_status.reason, "render failed");
        assert_eq!(failed.resolved_version.as_deref(), Some("1.2.0"));
        assert_eq!(failed.managed_resource_refs.len(), 1);
    }

    #[test]
    fn test_template_ref_display_name() {
        let r = TemplateRef {
            url: "https://charts.example.com".into(),
            path: "redis".into(),
            version: "^1.0.0".into(),
            ..Default::default()
        };
        assert_eq!(r.display_name(), "https://charts.example.com//redis@^1.0.0");

        let pinned = r.resolved(SourceType::Helm, "1.2.0");
        assert_eq!(pinned.display_name(), "https://charts.example.com//redis@1.2.0");
    }
}
