//! In-memory template cache
//!
//! Keyed by the strict resolved version, so floating specs that resolve to
//! the same version share an entry. Artifacts and initial values live in
//! separate namespaces under one TTL and one byte budget. Only successful
//! loads are ever inserted.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use stencil_core::config::CacheConfig;
use stencil_core::{SourceType, Template, TemplateRef, Values};

/// Cache coordinate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub repo: String,
    pub path: String,
    pub resolved_version: String,
    pub source_type: SourceType,
}

impl CacheKey {
    pub fn new(
        repo: impl Into<String>,
        path: impl Into<String>,
        resolved_version: impl Into<String>,
        source_type: SourceType,
    ) -> Self {
        Self {
            repo: repo.into(),
            path: path.into(),
            resolved_version: resolved_version.into(),
            source_type,
        }
    }

    /// Key for a resolved reference; `None` until version and type are known
    pub fn for_ref(template_ref: &TemplateRef) -> Option<Self> {
        Some(Self::new(
            template_ref.crd_name.as_deref().unwrap_or(&template_ref.url),
            &template_ref.path,
            template_ref.resolved_version.as_deref()?,
            template_ref.source_type?,
        ))
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    size: usize,
    seq: u64,
    expires: Instant,
}

/// One namespace of entries
#[derive(Debug)]
struct Shelf<V> {
    entries: DashMap<CacheKey, Entry<V>>,
}

impl<V: Clone> Shelf<V> {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn get(&self, key: &CacheKey, now: Instant) -> Option<V> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires > now {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, e| e.expires <= now);
        None
    }

    fn bytes(&self) -> usize {
        self.entries.iter().map(|e| e.size).sum()
    }

    fn drop_expired(&self, now: Instant) {
        self.entries.retain(|_, e| e.expires > now);
    }

    fn oldest(&self) -> Option<(CacheKey, u64)> {
        self.entries
            .iter()
            .min_by_key(|e| e.seq)
            .map(|e| (e.key().clone(), e.seq))
    }
}

/// Template artifact and initial-values cache
#[derive(Debug)]
pub struct TemplateCache {
    ttl: Duration,
    max_bytes: usize,
    seq: AtomicU64,
    artifacts: Shelf<Arc<Template>>,
    initial_values: Shelf<Values>,
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl TemplateCache {
    pub fn new(ttl: Duration, max_bytes: usize) -> Self {
        Self {
            ttl,
            max_bytes,
            seq: AtomicU64::new(0),
            artifacts: Shelf::new(),
            initial_values: Shelf::new(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl, config.max_bytes)
    }

    pub fn get_template(&self, key: &CacheKey) -> Option<Arc<Template>> {
        let hit = self.artifacts.get(key, Instant::now());
        tracing::debug!(?key, hit = hit.is_some(), "template cache lookup");
        hit
    }

    pub fn insert_template(&self, key: CacheKey, template: Arc<Template>) {
        let size = template.byte_size();
        self.insert(&self.artifacts, key, template, size);
    }

    pub fn get_values(&self, key: &CacheKey) -> Option<Values> {
        let hit = self.initial_values.get(key, Instant::now());
        tracing::debug!(?key, hit = hit.is_some(), "initial values cache lookup");
        hit
    }

    pub fn insert_values(&self, key: CacheKey, values: Values) {
        let size = values.byte_size();
        self.insert(&self.initial_values, key, values, size);
    }

    /// Bytes held across both namespaces
    pub fn used_bytes(&self) -> usize {
        self.artifacts.bytes() + self.initial_values.bytes()
    }

    pub fn len(&self) -> usize {
        self.artifacts.entries.len() + self.initial_values.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.artifacts.entries.clear();
        self.initial_values.entries.clear();
    }

    fn insert<V: Clone>(&self, shelf: &Shelf<V>, key: CacheKey, value: V, size: usize) {
        if size > self.max_bytes {
            tracing::debug!(?key, size, budget = self.max_bytes, "entry exceeds cache budget, not cached");
            return;
        }

        shelf.entries.remove(&key);
        self.make_room(size);

        let now = Instant::now();
        shelf.entries.insert(
            key,
            Entry {
                value,
                size,
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
                expires: now + self.ttl,
            },
        );
    }

    /// Evict expired entries, then the oldest, until `incoming` fits
    fn make_room(&self, incoming: usize) {
        if self.used_bytes() + incoming <= self.max_bytes {
            return;
        }

        let now = Instant::now();
        self.artifacts.drop_expired(now);
        self.initial_values.drop_expired(now);

        while self.used_bytes() + incoming > self.max_bytes {
            let oldest_artifact = self.artifacts.oldest();
            let oldest_values = self.initial_values.oldest();

            match (oldest_artifact, oldest_values) {
                (Some((a, a_seq)), Some((_, v_seq))) if a_seq < v_seq => {
                    self.artifacts.entries.remove(&a);
                }
                (_, Some((v, _))) => {
                    self.initial_values.entries.remove(&v);
                }
                (Some((a, _)), None) => {
                    self.artifacts.entries.remove(&a);
                }
                (None, None) => break,
            }
        }
    }
}
