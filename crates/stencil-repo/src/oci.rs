//! OCI registry client
//!
//! Pulls Helm charts stored as OCI artifacts through the distribution API:
//! manifest by tag, chart content layer by digest, tags for version
//! resolution. Anonymous requests that come back `401` are retried with a
//! bearer token obtained from the registry's `WWW-Authenticate` challenge.

use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, LazyLock, RwLock};

use stencil_core::{digest_matches, sha256_digest};

use crate::credentials::{Credentials, CredentialsResolver};
use crate::error::{RepoError, Result};
use crate::http::check_status;

/// Media types for Helm charts in OCI
pub mod media_types {
    /// Helm chart content layer
    pub const HELM_CONTENT: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
}

static CHALLENGE_PARAM: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).ok());

/// `oci://registry/repository[:tag]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciReference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
}

impl OciReference {
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = || RepoError::InvalidOciReference {
            reference: reference.to_string(),
        };

        let clean = reference.trim().trim_start_matches("oci://");
        let (registry, rest) = clean.split_once('/').ok_or_else(invalid)?;
        if registry.is_empty() || rest.is_empty() {
            return Err(invalid());
        }

        let (repository, tag) = match rest.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag.to_string())),
            _ => (rest, None),
        };

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.trim_matches('/').to_string(),
            tag,
        })
    }

    /// Append a chart name to the repository path
    pub fn join(&self, name: &str) -> Self {
        let name = name.trim_matches('/');
        if name.is_empty() || self.repository.rsplit('/').next() == Some(name) {
            return self.clone();
        }
        Self {
            repository: format!("{}/{}", self.repository, name),
            ..self.clone()
        }
    }

    /// Registry API base; loopback registries are plain HTTP
    pub fn api_base(&self) -> String {
        let host = match self.registry.find(']') {
            Some(end) if self.registry.starts_with('[') => &self.registry[..=end],
            _ => self.registry.split(':').next().unwrap_or_default(),
        };
        let scheme = if matches!(host, "localhost" | "127.0.0.1" | "[::1]") {
            "http"
        } else {
            "https"
        };
        format!("{}://{}/v2/{}", scheme, self.registry, self.repository)
    }
}

impl std::fmt::Display for OciReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "oci://{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    media_type: String,
    digest: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Parsed `WWW-Authenticate: Bearer ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    pub fn parse(header: &str) -> Option<Self> {
        let params = header.trim().strip_prefix("Bearer ")?;
        let re = CHALLENGE_PARAM.as_ref()?;

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for cap in re.captures_iter(params) {
            let value = cap[2].to_string();
            match &cap[1] {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            service,
            scope,
        })
    }
}

/// Client for one OCI repository
pub struct OciRegistry {
    reference: OciReference,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialsResolver>,
    token: RwLock<Option<String>>,
}

impl OciRegistry {
    pub fn new(
        reference: OciReference,
        client: reqwest::Client,
        credentials: Arc<dyn CredentialsResolver>,
    ) -> Self {
        Self {
            reference,
            client,
            credentials,
            token: RwLock::new(None),
        }
    }

    pub fn reference(&self) -> &OciReference {
        &self.reference
    }

    /// Tags published for the repository
    pub async fn list_tags(&self) -> Result<Vec<String>> {
        let url = format!("{}/tags/list", self.reference.api_base());
        let response = self.get(&url, None).await?;
        let list: TagList = response.json().await?;
        Ok(list.tags.unwrap_or_default())
    }

    /// Pull the chart archive for `tag`
    pub async fn pull_chart(&self, tag: &str) -> Result<Vec<u8>> {
        let base = self.reference.api_base();
        let manifest_url = format!("{}/manifests/{}", base, tag);
        let accept = format!(
            "{}, {}",
            media_types::OCI_MANIFEST,
            media_types::DOCKER_MANIFEST
        );

        let response = self.get(&manifest_url, Some(&accept)).await?;
        let manifest_digest = response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let manifest: Manifest = response.json().await?;

        tracing::debug!(
            reference = %self.reference,
            %tag,
            digest = manifest_digest.as_deref().unwrap_or("-"),
            "fetched OCI manifest"
        );

        let layer = manifest
            .layers
            .iter()
            .find(|l| l.media_type == media_types::HELM_CONTENT)
            .ok_or_else(|| RepoError::MalformedArtifact {
                location: format!("{}:{}", self.reference, tag),
                message: "manifest has no Helm chart content layer".to_string(),
                hint: Some(format!(
                    "push the chart with a layer of media type {}",
                    media_types::HELM_CONTENT
                )),
            })?;

        let blob_url = format!("{}/blobs/{}", base, layer.digest);
        let data = self.get(&blob_url, None).await?.bytes().await?.to_vec();

        if !digest_matches(&layer.digest, &data) {
            return Err(RepoError::IntegrityCheckFailed {
                name: format!("{}:{}", self.reference, tag),
                expected: layer.digest.clone(),
                actual: sha256_digest(&data),
            });
        }

        Ok(data)
    }

    /// GET with the cached token, negotiating one on a `401` challenge
    async fn get(&self, url: &str, accept: Option<&str>) -> Result<reqwest::Response> {
        let response = self.send(url, accept).await?;

        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return check_status(response);
        }

        let challenge = response
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(BearerChallenge::parse)
            .ok_or_else(|| RepoError::AuthRequired {
                url: url.to_string(),
            })?;

        let token = self.fetch_token(&challenge).await?;
        if let Ok(mut slot) = self.token.write() {
            *slot = Some(token);
        }

        check_status(self.send(url, accept).await?)
    }

    async fn send(&self, url: &str, accept: Option<&str>) -> Result<reqwest::Response> {
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(reqwest::header::ACCEPT, accept);
        }

        let token = self.token.read().ok().and_then(|t| t.clone());
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(%url, "GET");
        request.send().await.map_err(|e| RepoError::SourceUnreachable {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Exchange a challenge for a registry token
    async fn fetch_token(&self, challenge: &BearerChallenge) -> Result<String> {
        let credentials = self.credentials.resolve(&self.reference.to_string());
        if let Some(Credentials::Bearer { token }) = &credentials {
            return Ok(token.clone());
        }

        let mut request = self.client.get(&challenge.realm);
        let mut query = Vec::new();
        if let Some(service) = &challenge.service {
            query.push(("service", service.clone()));
        }
        if let Some(scope) = &challenge.scope {
            query.push(("scope", scope.clone()));
        }
        request = request.query(&query);
        if let Some(Credentials::Basic { username, password }) = &credentials {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await.map_err(|e| RepoError::SourceUnreachable {
            url: challenge.realm.clone(),
            message: e.to_string(),
        })?;
        let body: TokenResponse = check_status(response)?.json().await?;

        body.token
            .or(body.access_token)
            .ok_or_else(|| RepoError::AuthRequired {
                url: challenge.realm.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference() {
        let r = OciReference::parse("oci://ghcr.io/acme/charts/web:1.2.0").unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "acme/charts/web");
        assert_eq!(r.tag.as_deref(), Some("1.2.0"));
        assert_eq!(r.to_string(), "oci://ghcr.io/acme/charts/web:1.2.0");

        let r = OciReference::parse("oci://localhost:5000/web").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.tag, None);
        assert_eq!(r.api_base(), "http://localhost:5000/v2/web");

        assert!(OciReference::parse("oci://ghcr.io").is_err());
    }

    #[test]
    fn test_join() {
        let r = OciReference::parse("oci://ghcr.io/acme/charts").unwrap();
        assert_eq!(r.join("web").repository, "acme/charts/web");
        assert_eq!(r.join("charts").repository, "acme/charts");
        assert_eq!(r.join("").repository, "acme/charts");
        assert_eq!(r.join("web").api_base(), "https://ghcr.io/v2/acme/charts/web");
    }

    #[test]
    fn test_parse_challenge() {
        let c = BearerChallenge::parse(
            r#"Bearer realm="https://auth.example.com/token",service="registry.example.com",scope="repository:acme/web:pull,push""#,
        )
        .unwrap();

        assert_eq!(c.realm, "https://auth.example.com/token");
        assert_eq!(c.service.as_deref(), Some("registry.example.com"));
        assert_eq!(c.scope.as_deref(), Some("repository:acme/web:pull,push"));

        assert!(BearerChallenge::parse(r#"Basic realm="x""#).is_none());
        assert!(BearerChallenge::parse(r#"Bearer service="x""#).is_none());
    }
}
