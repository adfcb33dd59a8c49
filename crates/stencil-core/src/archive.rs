//! In-memory chart archives
//!
//! Chart bundles arrive as gzip tarballs (chart repositories, OCI layers) or
//! as a file listing read from a Git checkout. Both end up as a flat map of
//! relative path to bytes, which [`ChartFiles::partition`] sorts into the
//! parts of a chart.

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use tar::Archive;

use crate::error::{CoreError, Result};

/// Relative path to file contents
pub type FileMap = BTreeMap<String, Vec<u8>>;

/// Unpack a `.tgz` chart archive into memory
///
/// Helm archives nest everything under a `<chart>/` directory; that common
/// prefix is stripped so `Chart.yaml` ends up at the root.
pub fn unpack_chart_archive(bytes: &[u8]) -> Result<FileMap> {
    let decoder = GzDecoder::new(bytes);
    let mut archive = Archive::new(decoder);
    let mut contents = FileMap::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry.path()?.to_string_lossy().replace('\\', "/");
        if path.split('/').any(|part| part == "..") || path.starts_with('/') {
            return Err(CoreError::Archive {
                message: format!("archive entry escapes the chart root: {}", path),
            });
        }

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        contents.insert(path.trim_start_matches("./").to_string(), data);
    }

    if contents.is_empty() {
        return Err(CoreError::Archive {
            message: "archive contains no files".to_string(),
        });
    }

    Ok(strip_common_root(contents))
}

fn strip_common_root(files: FileMap) -> FileMap {
    let root = files
        .keys()
        .next()
        .and_then(|p| p.split_once('/'))
        .map(|(first, _)| format!("{}/", first));

    match root {
        Some(prefix) if files.keys().all(|p| p.starts_with(&prefix)) => files
            .into_iter()
            .map(|(k, v)| (k[prefix.len()..].to_string(), v))
            .collect(),
        _ => files,
    }
}

/// Lowercase hex SHA-256 of `bytes`
pub fn sha256_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compare an expected digest (optionally `sha256:`-prefixed) with content
pub fn digest_matches(expected: &str, bytes: &[u8]) -> bool {
    let expected = expected.strip_prefix("sha256:").unwrap_or(expected);
    expected.eq_ignore_ascii_case(&sha256_digest(bytes))
}

/// A chart's files sorted by role
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartFiles {
    pub chart_yaml: Option<Vec<u8>>,
    pub values_yaml: Option<Vec<u8>>,
    pub schema: Option<Vec<u8>>,
    /// `templates/...`, keyed by path relative to the chart root
    pub templates: FileMap,
    /// `crds/...`
    pub crds: FileMap,
    /// Bundles vendored under `charts/`, unpacked directories and `.tgz` alike
    pub subcharts: Vec<ChartFiles>,
    /// Everything else
    pub other: FileMap,
}

impl ChartFiles {
    /// Partition a flat file map rooted at the chart directory
    pub fn partition(files: FileMap) -> Result<Self> {
        let mut chart = ChartFiles::default();
        let mut nested: BTreeMap<String, FileMap> = BTreeMap::new();

        for (path, data) in files {
            match path.as_str() {
                "Chart.yaml" => chart.chart_yaml = Some(data),
                "values.yaml" => chart.values_yaml = Some(data),
                "values.schema.json" => chart.schema = Some(data),
                p if p.starts_with("templates/") => {
                    chart.templates.insert(path, data);
                }
                p if p.starts_with("crds/") => {
                    chart.crds.insert(path, data);
                }
                p if p.starts_with("charts/") => {
                    let rest = &p["charts/".len()..];
                    match rest.split_once('/') {
                        Some((dir, inner)) => {
                            nested
                                .entry(dir.to_string())
                                .or_default()
                                .insert(inner.to_string(), data);
                        }
                        None if rest.ends_with(".tgz") || rest.ends_with(".tar.gz") => {
                            let unpacked = unpack_chart_archive(&data)?;
                            chart.subcharts.push(ChartFiles::partition(unpacked)?);
                        }
                        None => {
                            chart.other.insert(path, data);
                        }
                    }
                }
                _ => {
                    chart.other.insert(path, data);
                }
            }
        }

        for (_, files) in nested {
            chart.subcharts.push(ChartFiles::partition(files)?);
        }

        Ok(chart)
    }

    /// Unpack and partition a chart archive
    pub fn from_archive(bytes: &[u8]) -> Result<Self> {
        Self::partition(unpack_chart_archive(bytes)?)
    }

    /// Name declared in the bundle's `Chart.yaml`, if it parses
    pub fn declared_name(&self) -> Option<String> {
        let raw = self.chart_yaml.as_deref()?;
        let doc: serde_yaml::Value = serde_yaml::from_slice(raw).ok()?;
        doc.get("name")?.as_str().map(String::from)
    }
}
