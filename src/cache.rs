//! Content-addressed result cache.
//!
//! Results are keyed by `(caller id, SHA-256 of the exact submitted bytes)`.
//! Scoping by caller keeps one tenant from learning what another submitted.
//! Entries expire by age; nothing deletes them explicitly.

use crate::clock::{to_chrono, Clock};
use crate::types::{Content, VerificationResult};
use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture};
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default cache capacity.
const DEFAULT_CACHE_CAPACITY: usize = 100_000;

/// SHA-256 digest of submitted content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash raw bytes.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Lowercase hex form, as stored in scan records.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hash the exact bytes of `content`.
#[must_use]
pub fn content_hash(content: &Content) -> ContentHash {
    ContentHash::of(content.as_bytes())
}

/// A cached analysis.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Hash of the analysed content.
    pub content_hash: ContentHash,
    /// Caller that submitted it.
    pub caller_id: String,
    /// Result as first returned.
    pub result: VerificationResult,
    /// When the entry was stored.
    pub created_at: DateTime<Utc>,
}

/// Per-caller result cache.
///
/// The in-memory implementation suits a single process. A fleet needs a
/// shared store behind the same trait.
pub trait ResultCache: Send + Sync {
    /// Fresh result for `(caller_id, hash)`, if any.
    fn get<'a>(
        &'a self,
        caller_id: &'a str,
        hash: &'a ContentHash,
    ) -> BoxFuture<'a, Option<VerificationResult>>;

    /// Store a result.
    fn put(&self, entry: CacheEntry) -> BoxFuture<'_, ()>;
}

/// Cache statistics for monitoring.
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, expired entries included.
    pub misses: u64,
    /// Number of entries stored.
    pub insertions: u64,
}

impl CacheStats {
    /// Hit rate as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

type CacheKey = (String, ContentHash);

/// LRU-bounded in-memory [`ResultCache`].
#[derive(Clone)]
pub struct InMemoryResultCache {
    inner: Arc<Mutex<LruCache<CacheKey, CacheEntry>>>,
    stats: Arc<Mutex<CacheStats>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemoryResultCache {
    /// Create a cache with the default capacity.
    #[must_use]
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY, ttl, clock)
    }

    /// Create a cache holding at most `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(cap))),
            stats: Arc::new(Mutex::new(CacheStats::default())),
            ttl,
            clock,
        }
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    /// Number of entries, expired ones included until next touched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn lookup(&self, caller_id: &str, hash: &ContentHash) -> Option<VerificationResult> {
        let key = (caller_id.to_string(), *hash);
        let now = self.clock.now();
        let ttl = to_chrono(self.ttl);

        let found = {
            let mut cache = self.inner.lock();
            match cache.get(&key) {
                Some(entry) if now - entry.created_at <= ttl => Some(entry.result.clone()),
                Some(_) => {
                    cache.pop(&key);
                    debug!("Cache entry {hash:?} for {caller_id} expired");
                    None
                }
                None => None,
            }
        };

        let mut stats = self.stats.lock();
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        found
    }

    fn store(&self, entry: CacheEntry) {
        let key = (entry.caller_id.clone(), entry.content_hash);
        self.inner.lock().put(key, entry);
        self.stats.lock().insertions += 1;
    }
}

impl fmt::Debug for InMemoryResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryResultCache")
            .field("len", &self.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ResultCache for InMemoryResultCache {
    fn get<'a>(
        &'a self,
        caller_id: &'a str,
        hash: &'a ContentHash,
    ) -> BoxFuture<'a, Option<VerificationResult>> {
        Box::pin(future::ready(self.lookup(caller_id, hash)))
    }

    fn put(&self, entry: CacheEntry) -> BoxFuture<'_, ()> {
        self.store(entry);
        Box::pin(future::ready(()))
    }
}
