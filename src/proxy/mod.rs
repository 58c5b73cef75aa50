//! Feed request handling: method routing, validation, cache, fetch and parse.
//!
//! [`Proxy::handle`] turns one request into exactly one [`ProxyResponse`]:
//!
//! 1. `OPTIONS` gets an empty preflight answer; anything but `GET`/`HEAD` is a 405
//! 2. `rss_url` and `count` are read from the query string
//! 3. The feed URL must pass [`safe_feed_url`]
//! 4. A fresh cache hit is returned as-is; a stale one is returned and
//!    refreshed in the background
//! 5. Otherwise the feed is fetched, sniffed for HTML, parsed, truncated and
//!    wrapped in the JSON envelope, and the result is stored in the background
//!
//! Cache failures never fail a request: read errors count as misses and
//! write errors are only logged.

mod error;
mod request;
mod response;

use axum::http::{Method, Uri};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use url::Url;

pub use error::ProxyError;
pub use request::{clamp_count, FeedQuery};
pub use response::{success_response, CacheStatus, ProxyResponse, JSON_CONTENT_TYPE};

use crate::cache::{CacheKey, CacheStore, CachedResponse, Freshness};
use crate::config::{DEFAULT_MAX_AGE_SECS, DEFAULT_STALE_WHILE_REVALIDATE_SECS};
use crate::feed::{parse_feed_with_base, Upstream};
use crate::util::{looks_like_html, safe_feed_url};

/// Request-independent proxy policy.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Upstream host allow-list; empty permits any public host.
    pub allow_hosts: Arc<[String]>,
    /// Freshness window advertised on success responses.
    pub max_age: Duration,
    /// Stale-serving window advertised on success responses.
    pub stale_while_revalidate: Duration,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            allow_hosts: Arc::from(Vec::new()),
            max_age: Duration::from_secs(DEFAULT_MAX_AGE_SECS),
            stale_while_revalidate: Duration::from_secs(DEFAULT_STALE_WHILE_REVALIDATE_SECS),
        }
    }
}

impl ProxySettings {
    /// `cache-control` value for success responses.
    pub fn cache_control(&self) -> String {
        format!(
            "public, max-age={}, stale-while-revalidate={}",
            self.max_age.as_secs(),
            self.stale_while_revalidate.as_secs()
        )
    }
}

/// Outcome of [`Proxy::handle`].
#[derive(Debug)]
pub struct Handled {
    pub response: ProxyResponse,
    /// Cache store or revalidation still running after the response is ready.
    ///
    /// The server detaches it; tests may await it.
    pub background: Option<JoinHandle<()>>,
}

impl Handled {
    fn now(response: ProxyResponse) -> Self {
        Self {
            response,
            background: None,
        }
    }
}

struct Inner {
    settings: ProxySettings,
    upstream: Arc<dyn Upstream>,
    cache: Arc<dyn CacheStore>,
    /// Keys with a background revalidation in flight.
    revalidating: Mutex<HashSet<CacheKey>>,
}

/// The feed proxy. Cheap to clone; clones share cache and in-flight state.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<Inner>,
}

impl Proxy {
    pub fn new(
        settings: ProxySettings,
        upstream: Arc<dyn Upstream>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                upstream,
                cache,
                revalidating: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.inner.settings
    }

    /// Handles one request. Never fails: errors and panics become error envelopes.
    pub async fn handle(&self, method: &Method, uri: &Uri) -> Handled {
        match AssertUnwindSafe(self.dispatch(method, uri)).catch_unwind().await {
            Ok(Ok(handled)) => handled,
            Ok(Err(err)) => {
                if err.status().is_server_error() {
                    tracing::warn!(uri = %uri, error = %err, "Feed request failed");
                } else {
                    tracing::debug!(uri = %uri, method = %method, error = %err, "Feed request refused");
                }
                Handled::now(ProxyResponse::error(&err))
            }
            Err(panic) => {
                let err = ProxyError::Unexpected(panic_message(panic.as_ref()));
                tracing::error!(uri = %uri, error = %err, "Panic while handling feed request");
                Handled::now(ProxyResponse::error(&err))
            }
        }
    }

    async fn dispatch(&self, method: &Method, uri: &Uri) -> Result<Handled, ProxyError> {
        if method == Method::OPTIONS {
            return Ok(Handled::now(ProxyResponse::preflight()));
        }
        if method != Method::GET && method != Method::HEAD {
            return Err(ProxyError::MethodNotAllowed);
        }

        let query = FeedQuery::from_uri(uri)?;
        let feed_url = safe_feed_url(&query.rss_url, &self.inner.settings.allow_hosts)?;
        let key = CacheKey::new(&feed_url, query.count);

        match self.inner.cache.get(&key).await {
            Ok(Some(hit)) if hit.freshness == Freshness::Fresh => {
                tracing::debug!(key = %key, "Cache hit");
                return Ok(Handled::now(ProxyResponse::from_cached(
                    hit.response,
                    CacheStatus::Hit,
                )));
            }
            Ok(Some(hit)) => {
                tracing::debug!(key = %key, "Serving stale entry");
                let background = self.spawn_revalidation(key, feed_url, query.count).await;
                return Ok(Handled {
                    response: ProxyResponse::from_cached(hit.response, CacheStatus::Stale),
                    background,
                });
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss"),
        }

        let cached = self.render(&feed_url, query.count).await?;
        let response = ProxyResponse::from_cached(cached.clone(), CacheStatus::Miss);
        let background = self.spawn_store(key, cached);

        Ok(Handled {
            response,
            background: Some(background),
        })
    }

    /// Fetches, sniffs, parses and wraps one feed.
    async fn render(&self, feed_url: &Url, count: usize) -> Result<CachedResponse, ProxyError> {
        let body = self.inner.upstream.fetch(feed_url).await?;
        if looks_like_html(&body) {
            return Err(ProxyError::HtmlBody);
        }

        let mut items = parse_feed_with_base(&body, Some(feed_url));
        let parsed = items.len();
        items.truncate(count);
        tracing::info!(
            feed = %feed_url,
            parsed = parsed,
            returned = items.len(),
            "Fetched feed"
        );

        success_response(&items, feed_url.as_str(), &self.inner.settings.cache_control())
    }

    fn spawn_store(&self, key: CacheKey, cached: CachedResponse) -> JoinHandle<()> {
        let cache = Arc::clone(&self.inner.cache);
        tokio::spawn(async move {
            if let Err(e) = cache.put(&key, cached).await {
                tracing::warn!(key = %key, error = %e, "Cache write failed");
            }
        })
    }

    /// Starts a refresh of `key` unless one is already running.
    async fn spawn_revalidation(
        &self,
        key: CacheKey,
        feed_url: Url,
        count: usize,
    ) -> Option<JoinHandle<()>> {
        if !self.inner.revalidating.lock().await.insert(key.clone()) {
            return None;
        }

        let proxy = self.clone();
        Some(tokio::spawn(async move {
            let outcome = AssertUnwindSafe(proxy.render(&feed_url, count))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(fresh)) => {
                    if let Err(e) = proxy.inner.cache.put(&key, fresh).await {
                        tracing::warn!(key = %key, error = %e, "Cache write failed");
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(key = %key, error = %e, "Background revalidation failed");
                }
                Err(panic) => {
                    tracing::error!(
                        key = %key,
                        error = %panic_message(panic.as_ref()),
                        "Panic during background revalidation"
                    );
                }
            }
            proxy.inner.revalidating.lock().await.remove(&key);
        }))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}
