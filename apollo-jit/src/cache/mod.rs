//! In memory cache of compiled plans.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use apollo_compiler::ast;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use tokio::time::Instant;

use crate::configuration::InMemoryCache;
use crate::error::CacheConfigError;
use crate::execution::CompiledPlan;
use crate::schema::Schema;
use crate::schema::SchemaId;

/// Identifies a compiled plan: schema instance, query text and operation name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    schema: SchemaId,
    query_hash: String,
    operation_name: Option<String>,
}

impl CacheKey {
    /// Build the key of `query` compiled against `schema`.
    ///
    /// The query is normalized first, so formatting differences (whitespace, commas,
    /// comments) map to the same key.
    pub fn new(schema: &Schema, query: &str, operation_name: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize(query));
        Self {
            schema: schema.id().clone(),
            query_hash: hex::encode(hasher.finalize()),
            operation_name: operation_name.map(str::to_owned),
        }
    }

    /// Hex encoded SHA-256 of the normalized query.
    pub fn query_hash(&self) -> &str {
        &self.query_hash
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.schema,
            self.query_hash,
            self.operation_name.as_deref().unwrap_or("-")
        )
    }
}

/// Re-prints the parsed document. Text that does not parse is only whitespace-collapsed, it
/// will fail compilation anyway.
fn normalize(query: &str) -> String {
    match ast::Document::parse(query, "query.graphql") {
        Ok(document) => document.to_string(),
        Err(_) => query.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

struct CacheEntry {
    plan: Arc<CompiledPlan>,
    inserted_at: Instant,
}

/// Snapshot of cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of cached plans.
    pub size: usize,
    /// Maximum number of cached plans.
    pub capacity: usize,
    /// Lookups that found a live plan.
    pub hits: u64,
    /// Lookups that found nothing or an expired plan.
    pub misses: u64,
    /// Plans dropped to make room for new ones.
    pub evictions: u64,
    /// `hits / (hits + misses)`, 0 before the first lookup.
    pub hit_rate: f64,
}

/// Bounded LRU cache of compiled plans with an optional time to live.
///
/// Evicting a plan only drops the cache's reference: callers still holding the [`Arc`] keep
/// a working plan.
pub struct QueryCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    capacity: NonZeroUsize,
    ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl QueryCache {
    /// Create a cache holding at most `capacity` plans.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Result<Self, CacheConfigError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(CacheConfigError::ZeroCapacity)?;
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(CacheConfigError::ZeroTtl);
        }
        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    /// Create a cache from the `cache.in_memory` configuration section.
    pub fn from_configuration(configuration: &InMemoryCache) -> Result<Self, CacheConfigError> {
        configuration.validate()?;
        Self::new(configuration.limit, configuration.ttl)
    }

    /// Look a plan up, marking it as most recently used.
    ///
    /// An expired plan is removed and counts as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CompiledPlan>> {
        let mut entries = self.entries.lock();
        let expired = match (entries.peek(key), self.ttl) {
            (Some(entry), Some(ttl)) => entry.inserted_at.elapsed() >= ttl,
            _ => false,
        };
        if expired {
            entries.pop(key);
            tracing::debug!(%key, "cached plan expired");
        }
        match entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.plan.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a plan, evicting the least recently used one if the cache is full.
    pub fn insert(&self, key: CacheKey, plan: Arc<CompiledPlan>) {
        let entry = CacheEntry {
            plan,
            inserted_at: Instant::now(),
        };
        let mut entries = self.entries.lock();
        if let Some((evicted, _)) = entries.push(key.clone(), entry)
            && evicted != key
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %evicted, "evicted least recently used plan");
        }
    }

    /// Drop every plan. Statistics are kept.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of cached plans, expired ones included until looked up.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no plan is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            size: self.len(),
            capacity: self.capacity.get(),
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .field("size", &self.len())
            .finish_non_exhaustive()
    }
}
