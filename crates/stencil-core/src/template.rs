//! Template artifacts
//!
//! A [`Template`] is the loaded, read-only form of one source coordinate:
//! manifest templates, schema, default values and attached dependencies.
//! Artifacts are shared behind `Arc` once built.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::archive::ChartFiles;
use crate::chart::ChartMetadata;
use crate::error::{CoreError, Result};
use crate::schema::FieldTree;
use crate::values::Values;

/// Custom resource a CRD-sourced template renders into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrdTarget {
    /// CRD object name, e.g. `widgets.example.com`
    pub name: String,
    pub group: String,
    /// Storage version used for rendering
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl CrdTarget {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// A dependency attached to a parent artifact
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateDependency {
    /// Name templates see the dependency under (alias or chart name)
    pub name: String,
    /// Dotted path into the root values gating inclusion
    pub condition: Option<String>,
    pub template: Arc<Template>,
}

/// A loaded template bundle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    pub name: String,

    /// `None` for CRD-sourced artifacts
    pub metadata: Option<ChartMetadata>,

    /// Manifest templates keyed by path relative to the chart root
    pub templates: BTreeMap<String, String>,

    /// `values.yaml`
    pub default_values: Values,

    /// Typed schema tree (values schema or CRD spec schema)
    pub schema: FieldTree,

    /// Raw `values.schema.json`
    pub raw_schema: Option<Vec<u8>>,

    /// Auxiliary files available to templates
    pub files: BTreeMap<String, Vec<u8>>,

    /// Files under `crds/`, not templated
    pub crds: BTreeMap<String, String>,

    pub dependencies: Vec<TemplateDependency>,

    pub icon: Option<String>,

    pub crd_target: Option<CrdTarget>,
}

impl Template {
    /// Build an artifact (without dependencies) from partitioned chart files
    ///
    /// `location` names where the files came from and is used in errors.
    pub fn from_chart_files(files: &ChartFiles, location: &str) -> Result<Self> {
        let chart_yaml = files.chart_yaml.as_deref().ok_or_else(|| {
            CoreError::malformed(
                format!("Chart.yaml not found at {}", location),
                "point the template path at the chart directory that contains Chart.yaml",
            )
        })?;
        let metadata = ChartMetadata::from_bytes(chart_yaml)?;

        if files.templates.is_empty() && !metadata.is_library() {
            return Err(CoreError::malformed(
                format!("templates/ directory not found at {}", location),
                "add manifest templates under templates/ next to Chart.yaml",
            ));
        }

        let templates = files
            .templates
            .iter()
            .map(|(path, bytes)| Ok((path.clone(), utf8(path, bytes)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        let crds = files
            .crds
            .iter()
            .map(|(path, bytes)| Ok((path.clone(), utf8(path, bytes)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        let default_values = match &files.values_yaml {
            Some(bytes) => Values::from_yaml_bytes(bytes)?,
            None => Values::new(),
        };

        let schema = match &files.schema {
            Some(bytes) => FieldTree::from_json_bytes(bytes)?,
            None => FieldTree::default(),
        };

        Ok(Self {
            name: metadata.name.clone(),
            icon: metadata.icon.clone(),
            metadata: Some(metadata),
            templates,
            default_values,
            schema,
            raw_schema: files.schema.clone(),
            files: files.other.clone(),
            crds,
            dependencies: Vec::new(),
            crd_target: None,
        })
    }

    /// Chart version, if this is a chart
    pub fn version(&self) -> Option<String> {
        self.metadata.as_ref().map(|m| m.version.to_string())
    }

    /// Initial values: schema defaults overlaid with `values.yaml`
    pub fn initial_values(&self) -> Values {
        let mut values = self.schema.defaults();
        values.merge(&self.default_values);
        values
    }

    /// Approximate in-memory size, including dependencies
    pub fn byte_size(&self) -> usize {
        let templates: usize = self.templates.iter().map(|(k, v)| k.len() + v.len()).sum();
        let files: usize = self.files.iter().map(|(k, v)| k.len() + v.len()).sum();
        let crds: usize = self.crds.iter().map(|(k, v)| k.len() + v.len()).sum();
        let deps: usize = self
            .dependencies
            .iter()
            .map(|d| d.template.byte_size())
            .sum();

        self.name.len()
            + templates
            + files
            + crds
            + self.raw_schema.as_ref().map_or(0, Vec::len)
            + self.default_values.byte_size()
            + deps
    }
}

fn utf8(path: &str, bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| CoreError::MalformedArtifact {
        message: format!("{} is not valid UTF-8", path),
        hint: None,
    })
}
