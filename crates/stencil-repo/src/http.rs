//! Chart repository client
//!
//! Helm-style repositories serve `index.yaml` at their root and chart
//! archives at the URLs the index lists.

use std::sync::Arc;

use stencil_core::{digest_matches, sha256_digest};
use url::Url;

use crate::credentials::CredentialsResolver;
use crate::error::{RepoError, Result};
use crate::index::{ChartEntry, ChartIndex};
use crate::version::{describe_candidates, resolve_semver};

/// Client for one chart repository
#[derive(Clone)]
pub struct HttpRepository {
    url: String,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialsResolver>,
}

impl HttpRepository {
    pub fn new(
        url: &str,
        client: reqwest::Client,
        credentials: Arc<dyn CredentialsResolver>,
    ) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            client,
            credentials,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn index_url(&self) -> String {
        format!("{}/index.yaml", self.url)
    }

    /// Fetch and parse `index.yaml`
    pub async fn fetch_index(&self) -> Result<ChartIndex> {
        let index_url = self.index_url();
        let bytes = get_bytes(&self.client, self.credentials.as_ref(), &index_url).await?;
        ChartIndex::from_bytes(&bytes, &index_url)
    }

    /// Whether the URL serves a parseable index
    pub async fn probe(&self) -> bool {
        match self.fetch_index().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "not a chart repository");
                false
            }
        }
    }

    /// Resolve a floating spec to the matching index entry
    pub fn select<'a>(&self, index: &'a ChartIndex, name: &str, spec: &str) -> Result<&'a ChartEntry> {
        let versions = index.versions(name);
        resolve_semver(spec, &versions)
            .and_then(|version| index.get_version(name, &version))
            .ok_or_else(|| RepoError::VersionNotFound {
                name: name.to_string(),
                spec: spec.to_string(),
                repo: self.url.clone(),
                available: describe_candidates(&versions),
            })
    }

    /// Download an archive and verify its digest when the index has one
    pub async fn download(&self, entry: &ChartEntry) -> Result<Vec<u8>> {
        let url = entry
            .download_url()
            .ok_or_else(|| RepoError::MalformedArtifact {
                location: self.index_url(),
                message: format!("{}-{} lists no download URL", entry.name, entry.version),
                hint: None,
            })?;
        let full_url = self.resolve_url(url)?;

        let data = get_bytes(&self.client, self.credentials.as_ref(), &full_url).await?;

        if let Some(expected) = entry.digest.as_deref().filter(|d| !d.is_empty())
            && !digest_matches(expected, &data)
        {
            return Err(RepoError::IntegrityCheckFailed {
                name: format!("{}-{}", entry.name, entry.version),
                expected: expected.to_string(),
                actual: sha256_digest(&data),
            });
        }

        Ok(data)
    }

    /// Resolve a download URL relative to the repository root
    fn resolve_url(&self, url: &str) -> Result<String> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }
        let base = Url::parse(&format!("{}/", self.url))?;
        Ok(base.join(url)?.to_string())
    }
}

/// GET `url`, attaching credentials the resolver has for it
pub(crate) async fn get_bytes(
    client: &reqwest::Client,
    credentials: &dyn CredentialsResolver,
    url: &str,
) -> Result<Vec<u8>> {
    let mut request = client.get(url);
    if let Some(creds) = credentials.resolve(url) {
        request = request.header(reqwest::header::AUTHORIZATION, creds.auth_header());
    }

    tracing::debug!(%url, "GET");
    let response = request.send().await.map_err(|e| RepoError::SourceUnreachable {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let response = check_status(response)?;
    Ok(response.bytes().await?.to_vec())
}

pub(crate) fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(RepoError::AuthRequired { url });
    }
    Err(RepoError::HttpError {
        status: status.as_u16(),
        url,
    })
}
