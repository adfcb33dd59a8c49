//! Repository credentials
//!
//! Credentials are scoped to URL prefixes. A resolver is consulted once per
//! request URL; nothing is sent when it returns `None`.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default environment variable names read by [`EnvCredentials`]
pub const USERNAME_VAR: &str = "STENCIL_REPO_USERNAME";
pub const PASSWORD_VAR: &str = "STENCIL_REPO_PASSWORD";

/// Credential types supported
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Credentials {
    /// Basic authentication (username/password)
    Basic { username: String, password: String },

    /// Bearer token authentication
    Bearer { token: String },
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Credentials::Bearer {
            token: token.into(),
        }
    }

    /// `Authorization` header value
    pub fn auth_header(&self) -> String {
        match self {
            Credentials::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password));
                format!("Basic {}", encoded)
            }
            Credentials::Bearer { token } => format!("Bearer {}", token),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// Looks up credentials for a repository URL
pub trait CredentialsResolver: Send + Sync {
    fn resolve(&self, url: &str) -> Option<Credentials>;
}

/// Anonymous access everywhere
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialsResolver for NoCredentials {
    fn resolve(&self, _url: &str) -> Option<Credentials> {
        None
    }
}

/// Credentials keyed by URL prefix; the longest matching prefix wins
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    scopes: HashMap<String, Credentials>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add credentials for a URL scope
    pub fn add(&mut self, url_prefix: &str, credentials: Credentials) {
        let prefix = url_prefix.trim_end_matches('/').to_string();
        self.scopes.insert(prefix, credentials);
    }

    pub fn with(mut self, url_prefix: &str, credentials: Credentials) -> Self {
        self.add(url_prefix, credentials);
        self
    }
}

impl CredentialsResolver for StaticCredentials {
    fn resolve(&self, url: &str) -> Option<Credentials> {
        self.scopes
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, creds)| creds.clone())
    }
}

/// Basic credentials from environment variables, applied to every URL
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    username_var: String,
    password_var: String,
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new(USERNAME_VAR, PASSWORD_VAR)
    }
}

impl EnvCredentials {
    pub fn new(username_var: impl Into<String>, password_var: impl Into<String>) -> Self {
        Self {
            username_var: username_var.into(),
            password_var: password_var.into(),
        }
    }

    fn resolve_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<Credentials> {
        let username = lookup(&self.username_var).filter(|v| !v.is_empty())?;
        let password = lookup(&self.password_var).unwrap_or_default();
        Some(Credentials::basic(username, password))
    }
}

impl CredentialsResolver for EnvCredentials {
    fn resolve(&self, _url: &str) -> Option<Credentials> {
        self.resolve_with(|name| std::env::var(name).ok())
    }
}
