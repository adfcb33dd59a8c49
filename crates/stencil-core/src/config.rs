//! Stencil configuration
//!
//! Stored in `~/.config/stencil/config.yaml`. Every field has a default, so a
//! missing file is equivalent to an empty one.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StencilConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub git: GitConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub apply: ApplyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Entry lifetime
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    /// Total byte budget across entries
    #[serde(default = "default_cache_max_bytes")]
    pub max_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
            max_bytes: default_cache_max_bytes(),
        }
    }
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_cache_max_bytes() -> usize {
    64 * 1024 * 1024
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    /// Git executable
    #[serde(default = "default_git_binary")]
    pub binary: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
        }
    }
}

fn default_git_binary() -> String {
    "git".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderConfig {
    /// Fail on undefined variables
    #[serde(default = "default_true")]
    pub strict: bool,

    /// Value exposed as `Capabilities.HelmVersion.Version`
    #[serde(default = "default_templating_version")]
    pub templating_version: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            strict: true,
            templating_version: default_templating_version(),
        }
    }
}

fn default_templating_version() -> String {
    "v3.14.0".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyConfig {
    #[serde(default = "default_field_manager")]
    pub field_manager: String,

    /// Retries for updates rejected with a conflict, 0 disables
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: usize,

    /// Initial backoff between conflict retries
    #[serde(default = "default_retry_backoff", with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            field_manager: default_field_manager(),
            conflict_retries: default_conflict_retries(),
            retry_backoff: default_retry_backoff(),
        }
    }
}

fn default_field_manager() -> String {
    "stencil".to_string()
}

fn default_conflict_retries() -> usize {
    3
}

fn default_retry_backoff() -> Duration {
    Duration::from_millis(200)
}

impl StencilConfig {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|e| CoreError::InvalidConfig {
            message: format!("{}: {}", path.display(), e),
        })
    }

    /// Get default configuration path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| CoreError::InvalidConfig {
            message: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("stencil").join("config.yaml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StencilConfig::default();
        assert_eq!(config.cache.ttl, Duration::from_secs(900));
        assert_eq!(config.cache.max_bytes, 64 * 1024 * 1024);
        assert_eq!(config.git.binary, "git");
        assert!(config.render.strict);
        assert_eq!(config.apply.field_manager, "stencil");
        assert_eq!(config.apply.conflict_retries, 3);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "cache:\n  ttl: 5m\napply:\n  conflictRetries: 0\n  retryBackoff: 1s\n",
        )
        .unwrap();

        let config = StencilConfig::load_from(&path).unwrap();

        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        assert_eq!(config.cache.max_bytes, 64 * 1024 * 1024);
        assert_eq!(config.apply.conflict_retries, 0);
        assert_eq!(config.apply.retry_backoff, Duration::from_secs(1));
        assert_eq!(config.render.templating_version, "v3.14.0");
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "cache:\n  ttl: forever\n").unwrap();

        assert!(matches!(
            StencilConfig::load_from(&path),
            Err(CoreError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "").unwrap();

        assert_eq!(StencilConfig::load_from(&path).unwrap(), StencilConfig::default());
    }
}
