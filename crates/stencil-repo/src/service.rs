//! Template service
//!
//! Entry point for the rest of the workspace: classify a reference, resolve
//! its floating version, and load the artifact through the cache.

use std::sync::Arc;

use stencil_core::config::StencilConfig;
use stencil_core::{SourceType, Template, TemplateRef, Values};

use crate::cache::{CacheKey, TemplateCache};
use crate::crd::{CrdProvider, NoCrdProvider};
use crate::credentials::{CredentialsResolver, EnvCredentials};
use crate::error::Result;
use crate::loader::{ChartLoader, classify};

/// Collaborators shared by every load
#[derive(Clone)]
pub struct SourceContext {
    pub client: reqwest::Client,
    pub credentials: Arc<dyn CredentialsResolver>,
    pub crd_provider: Arc<dyn CrdProvider>,
    pub cache: Arc<TemplateCache>,
    pub config: StencilConfig,
}

impl SourceContext {
    /// Context with environment credentials and no cluster access
    pub fn new(config: StencilConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("stencil/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            client,
            credentials: Arc::new(EnvCredentials::default()),
            crd_provider: Arc::new(NoCrdProvider),
            cache: Arc::new(TemplateCache::from_config(&config.cache)),
            config,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialsResolver>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_crd_provider(mut self, provider: Arc<dyn CrdProvider>) -> Self {
        self.crd_provider = provider;
        self
    }

    pub fn with_cache(mut self, cache: Arc<TemplateCache>) -> Self {
        self.cache = cache;
        self
    }
}

/// Resolves references and serves artifacts
#[derive(Clone)]
pub struct TemplateService {
    ctx: Arc<SourceContext>,
}

impl TemplateService {
    pub fn new(ctx: SourceContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &SourceContext {
        &self.ctx
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.ctx.cache
    }

    /// Pin a reference to its source type and strict version
    ///
    /// A reference that already carries both is returned unchanged.
    pub async fn resolve(&self, template_ref: &TemplateRef) -> Result<TemplateRef> {
        let (source_type, version) = self.pin(template_ref).await?;
        Ok(template_ref.resolved(source_type, version))
    }

    async fn pin(&self, template_ref: &TemplateRef) -> Result<(SourceType, String)> {
        if let (Some(source_type), Some(version)) = (template_ref.source_type, &template_ref.resolved_version) {
            return Ok((source_type, version.clone()));
        }

        let source_type = classify(template_ref, &self.ctx).await?;
        let loader = ChartLoader::new(source_type, template_ref, &self.ctx)?;
        let version = loader.resolve_version(&template_ref.version).await?;

        tracing::debug!(
            reference = %template_ref.display_name(),
            %source_type,
            %version,
            "resolved template reference"
        );
        Ok((source_type, version))
    }

    /// Load the artifact for a reference, serving cache hits
    pub async fn get_template(&self, template_ref: &TemplateRef) -> Result<Arc<Template>> {
        let (source_type, version) = self.pin(template_ref).await?;
        let resolved = template_ref.resolved(source_type, &version);
        let key = CacheKey::for_ref(&resolved);

        if let Some(hit) = key.as_ref().and_then(|k| self.ctx.cache.get_template(k)) {
            return Ok(hit);
        }

        tracing::info!(reference = %resolved.display_name(), "loading template");
        let loader = ChartLoader::new(source_type, &resolved, &self.ctx)?;
        let template = Arc::new(loader.load(&version, &self.ctx).await?);

        if let Some(key) = key {
            self.ctx.cache.insert_template(key, template.clone());
        }
        Ok(template)
    }

    /// Initial values: schema defaults overlaid with `values.yaml`
    pub async fn get_initial_values(&self, template_ref: &TemplateRef) -> Result<Values> {
        let resolved = self.resolve(template_ref).await?;
        let key = CacheKey::for_ref(&resolved);

        if let Some(hit) = key.as_ref().and_then(|k| self.ctx.cache.get_values(k)) {
            return Ok(hit);
        }

        let values = self.get_template(&resolved).await?.initial_values();
        if let Some(key) = key {
            self.ctx.cache.insert_values(key, values.clone());
        }
        Ok(values)
    }
}
