//! Bounded in-memory cache for embedding vectors.
//!
//! Keys are `(kind, content)` pairs. Backed by a `moka` cache with LRU
//! eviction and a per-entry TTL. One instance is shared by every in-flight
//! request; pending maintenance is flushed on every write so the capacity
//! bound holds as soon as `set` returns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use galleria_core::CacheConfig;
use moka::Expiry;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// What an embedding was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    Text,
    Image,
}

impl EmbeddingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

impl std::fmt::Display for EmbeddingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: EmbeddingKind,
    pub content: String,
}

impl CacheKey {
    pub fn new(kind: EmbeddingKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(EmbeddingKind::Text, content)
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self::new(EmbeddingKind::Image, url)
    }
}

#[derive(Clone)]
struct Entry {
    vector: Vec<f32>,
    created_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

/// Expires each entry `ttl` after it was last written.
struct EntryTtl;

impl Expiry<CacheKey, Entry> for EntryTtl {
    fn expire_after_create(&self, _key: &CacheKey, entry: &Entry, _at: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        entry: &Entry,
        _at: Instant,
        _remaining: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Process-wide embedding cache with LRU eviction and per-entry TTL.
pub struct EmbeddingCache {
    entries: Cache<CacheKey, Entry>,
    capacity: usize,
    default_ttl: Duration,
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl EmbeddingCache {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        let entries = Cache::builder()
            .max_capacity(capacity as u64)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(EntryTtl)
            .eviction_listener(|key: Arc<CacheKey>, _entry: Entry, cause: RemovalCause| {
                if matches!(cause, RemovalCause::Size) {
                    debug!(kind = %key.kind, "evicted least-recently-used embedding");
                }
            })
            .build();
        Self {
            entries,
            capacity,
            default_ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, config.ttl())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up `key`, promoting it to most-recently-used on a hit.
    ///
    /// Expired entries are removed and reported as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<f32>> {
        self.get_at(key, Instant::now())
    }

    /// Insert with the default TTL.
    pub fn set(&self, key: CacheKey, vector: Vec<f32>) {
        self.set_at(key, vector, self.default_ttl, Instant::now());
    }

    pub fn set_with_ttl(&self, key: CacheKey, vector: Vec<f32>, ttl: Duration) {
        self.set_at(key, vector, ttl, Instant::now());
    }

    /// Remove `key`; returns whether it was present.
    pub fn delete(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }

    pub fn size(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn get_at(&self, key: &CacheKey, now: Instant) -> Option<Vec<f32>> {
        match self.entries.get(key) {
            Some(entry) if !entry.expired_at(now) => return Some(entry.vector),
            Some(_) => debug!(kind = %key.kind, "embedding cache entry expired"),
            // moka hides entries past their TTL but keeps them until maintenance.
            None => {}
        }
        self.entries.invalidate(key);
        None
    }

    fn set_at(&self, key: CacheKey, vector: Vec<f32>, ttl: Duration, now: Instant) {
        self.entries.insert(
            key,
            Entry {
                vector,
                created_at: now,
                ttl,
            },
        );
        self.entries.run_pending_tasks();
    }
}
