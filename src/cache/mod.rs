//! Response cache keyed by canonical request.
//!
//! Stores complete serialized responses. A store never invents its own
//! lifetime: it reads `max-age` and `stale-while-revalidate` from the
//! entry's `cache-control` header, and refuses entries marked `no-store` or
//! `private` or lacking `max-age`.
//!
//! Two backends implement [`CacheStore`]:
//!
//! - [`MemoryCache`] - bounded LRU map, lost on restart
//! - [`SqliteCache`] - persistent table shared across restarts

mod memory;
mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache migration failed: {0}")]
    Migrate(String),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Canonical cache key: `/?rss_url=<url>&count=<n>`, form-urlencoded.
///
/// Built from the already-validated URL and the clamped count, so requests
/// that differ only in parameter order, fragment or out-of-range count
/// share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(feed_url: &Url, count: usize) -> Self {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("rss_url", feed_url.as_str())
            .append_pair("count", &count.to_string())
            .finish();
        Self(format!("/?{query}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored response: status, headers (CORS excluded) and JSON body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CachedResponse {
    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Lifetime declared by this response's own `cache-control` header.
    pub fn ttl(&self) -> Option<CacheTtl> {
        self.header("cache-control")
            .and_then(CacheTtl::from_cache_control)
    }
}

/// Lifetime of a cache entry, read from `cache-control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtl {
    /// Time the entry is served as fresh.
    pub max_age: Duration,
    /// Extra time the entry may be served stale while it is refreshed.
    pub stale_while_revalidate: Duration,
}

impl CacheTtl {
    /// Parses the directives that matter for storage.
    ///
    /// Returns `None` when the response must not be stored: `no-store`,
    /// `private`, or no usable `max-age`.
    ///
    /// ```
    /// use feedrelay::cache::CacheTtl;
    /// use std::time::Duration;
    ///
    /// let ttl = CacheTtl::from_cache_control("public, max-age=600, stale-while-revalidate=60").unwrap();
    /// assert_eq!(ttl.max_age, Duration::from_secs(600));
    /// assert_eq!(ttl.stale_while_revalidate, Duration::from_secs(60));
    /// assert!(CacheTtl::from_cache_control("no-store").is_none());
    /// ```
    pub fn from_cache_control(value: &str) -> Option<Self> {
        let mut max_age = None;
        let mut stale = Duration::ZERO;

        for directive in value.split(',') {
            let (name, arg) = match directive.split_once('=') {
                Some((name, arg)) => (name.trim(), Some(arg.trim().trim_matches('"'))),
                None => (directive.trim(), None),
            };

            if name.eq_ignore_ascii_case("no-store") || name.eq_ignore_ascii_case("private") {
                return None;
            }
            let seconds = arg.and_then(|a| a.parse::<u64>().ok()).map(Duration::from_secs);
            if name.eq_ignore_ascii_case("max-age") {
                max_age = seconds;
            } else if name.eq_ignore_ascii_case("stale-while-revalidate") {
                stale = seconds.unwrap_or(Duration::ZERO);
            }
        }

        max_age
            .filter(|age| !age.is_zero())
            .map(|max_age| Self {
                max_age,
                stale_while_revalidate: stale,
            })
    }
}

/// Whether a hit is still within `max-age`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Past `max-age` but within `stale-while-revalidate`.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    pub response: CachedResponse,
    pub freshness: Freshness,
}

/// Storage for complete responses.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the entry for `key` unless it is absent or fully expired.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheHit>, CacheError>;

    /// Stores `response` under `key` for the lifetime its `cache-control` allows.
    ///
    /// Responses without a storable lifetime are silently dropped.
    async fn put(&self, key: &CacheKey, response: CachedResponse) -> Result<(), CacheError>;
}

#[cfg(test)]
pub(crate) fn sample_response(cache_control: &str) -> CachedResponse {
    CachedResponse {
        status: 200,
        headers: vec![
            ("content-type".into(), "application/json; charset=utf-8".into()),
            ("cache-control".into(), cache_control.into()),
        ],
        body: r#"{"status":"ok","items":[]}"#.into(),
    }
}
