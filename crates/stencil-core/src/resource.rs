//! Managed resources and health

use serde::{Deserialize, Serialize};
use std::fmt;

/// Manifest document separator
pub const DOCUMENT_SEPARATOR: &str = "---";

/// A cluster object owned by a module
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManagedResource {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Present in the cluster but absent from the latest manifest
    #[serde(default)]
    pub deleted: bool,
}

impl ManagedResource {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for ManagedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// Aggregate health of a module's resources
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    Progressing,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::Healthy => "Healthy",
            Self::Unhealthy => "Unhealthy",
            Self::Progressing => "Progressing",
        };
        write!(f, "{}", s)
    }
}

/// Split a multi-document manifest
///
/// Empty and comment-only documents are dropped. A separator only counts at
/// the start of a line.
pub fn split_documents(manifest: &str) -> Vec<&str> {
    let mut docs = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in manifest.split_inclusive('\n') {
        if is_separator(line) {
            docs.push(&manifest[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    docs.push(&manifest[start..]);

    docs.into_iter()
        .map(str::trim)
        .filter(|doc| !is_blank_document(doc))
        .collect()
}

fn is_separator(line: &str) -> bool {
    let line = line.trim_end();
    line == DOCUMENT_SEPARATOR || line.starts_with("--- ") || line.starts_with("---#")
}

fn is_blank_document(doc: &str) -> bool {
    doc.lines()
        .map(str::trim)
        .all(|l| l.is_empty() || l.starts_with('#'))
}
