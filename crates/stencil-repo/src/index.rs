//! Chart repository index (`index.yaml`)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{RepoError, Result};
use crate::version::parse_version;

/// Repository index, Helm format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartIndex {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Chart versions by chart name
    #[serde(default)]
    pub entries: HashMap<String, Vec<ChartEntry>>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

/// One published chart version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartEntry {
    #[serde(default)]
    pub name: String,

    pub version: String,

    /// Download URLs, absolute or relative to the repository
    #[serde(default)]
    pub urls: Vec<String>,

    /// `sha256` of the archive, hex encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ChartEntry {
    pub fn download_url(&self) -> Option<&str> {
        self.urls.first().map(String::as_str)
    }
}

impl ChartIndex {
    /// Parse an index fetched from `url`
    pub fn from_bytes(bytes: &[u8], url: &str) -> Result<Self> {
        serde_yaml::from_slice(bytes).map_err(|e| RepoError::InvalidIndex {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Every version string published for `name`
    pub fn versions(&self, name: &str) -> Vec<String> {
        self.entries
            .get(name)
            .map(|entries| entries.iter().map(|e| e.version.clone()).collect())
            .unwrap_or_default()
    }

    /// Entry whose version equals `version` (semver equality, `v` prefix ignored)
    pub fn get_version(&self, name: &str, version: &str) -> Option<&ChartEntry> {
        let wanted = parse_version(version);
        self.entries.get(name)?.iter().find(|e| {
            e.version == version
                || (wanted.is_some() && parse_version(&e.version) == wanted)
        })
    }
}
