use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{CacheError, CacheHit, CacheKey, CacheStore, CachedResponse, Freshness};

struct Entry {
    response: CachedResponse,
    fresh_until: Instant,
    stale_until: Instant,
}

/// In-process LRU response cache.
///
/// Least recently used entries are evicted once `capacity` is reached;
/// expired entries are dropped when they are next looked up.
pub struct MemoryCache {
    entries: Mutex<LruCache<CacheKey, Entry>>,
}

impl MemoryCache {
    /// Creates a cache holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheHit>, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let hit = entries.get(key).and_then(|entry| {
            let freshness = if now < entry.fresh_until {
                Freshness::Fresh
            } else if now < entry.stale_until {
                Freshness::Stale
            } else {
                return None;
            };
            Some(CacheHit {
                response: entry.response.clone(),
                freshness,
            })
        });

        if hit.is_none() {
            // Expired (or absent); popping an absent key is a no-op
            entries.pop(key);
        }

        Ok(hit)
    }

    async fn put(&self, key: &CacheKey, response: CachedResponse) -> Result<(), CacheError> {
        let Some(ttl) = response.ttl() else {
            tracing::debug!(key = %key, "Response not cacheable, skipping store");
            return Ok(());
        };

        let now = Instant::now();
        let fresh_until = now + ttl.max_age;
        let entry = Entry {
            response,
            fresh_until,
            stale_until: fresh_until + ttl.stale_while_revalidate,
        };

        self.entries.lock().await.put(key.clone(), entry);
        Ok(())
    }
}
