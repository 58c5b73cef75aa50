//! End-to-end tests over a bound HTTP server with an in-process upstream.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use url::Url;

use feedrelay::cache::{CacheStore, MemoryCache, SqliteCache};
use feedrelay::feed::{FetchError, Upstream};
use feedrelay::{server, Proxy, ProxySettings};

const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title type="html">Ben &amp; Jerry</title>
    <link rel="self" href="https://example.com/self/1"/>
    <link rel="alternate" href="/posts/1"/>
    <id>urn:uuid:1</id>
    <updated>2024-01-01T00:00:00Z</updated>
    <content type="html"><![CDATA[<p>Hello</p>]]></content>
  </entry>
  <entry>
    <title>Second</title>
    <id>https://example.com/posts/2</id>
    <published>2023-12-31T00:00:00Z</published>
    <summary>Short</summary>
  </entry>
</feed>"#;

struct CountingUpstream {
    body: String,
    calls: AtomicUsize,
}

#[async_trait]
impl Upstream for CountingUpstream {
    async fn fetch(&self, _url: &Url) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.body.clone())
    }
}

struct TestServer {
    addr: SocketAddr,
    upstream: Arc<CountingUpstream>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    async fn start(body: &str, cache: Arc<dyn CacheStore>) -> Self {
        let upstream = Arc::new(CountingUpstream {
            body: body.to_string(),
            calls: AtomicUsize::new(0),
        });
        let proxy = Proxy::new(ProxySettings::default(), upstream.clone(), cache);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server::serve(listener, proxy, async {
            let _ = rx.await;
        }));

        Self {
            addr,
            upstream,
            shutdown: Some(tx),
            handle,
        }
    }

    fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }

    fn calls(&self) -> usize {
        self.upstream.calls.load(Ordering::SeqCst)
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

async fn json(response: reqwest::Response) -> Value {
    serde_json::from_slice(&response.bytes().await.unwrap()).unwrap()
}

const FEED_QUERY: &str = "/?rss_url=https%3A%2F%2Fexample.com%2Fatom.xml&count=10";

/// Waits until the detached cache store has landed.
async fn wait_for_cache(cache: &dyn CacheStore) {
    let key = feedrelay::cache::CacheKey::new(&Url::parse("https://example.com/atom.xml").unwrap(), 10);
    for _ in 0..100 {
        if cache.get(&key).await.unwrap().is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("cache entry never stored");
}

#[tokio::test]
async fn test_get_returns_envelope_and_caches() {
    let cache = Arc::new(MemoryCache::new(16));
    let server = TestServer::start(ATOM, cache.clone()).await;
    let client = reqwest::Client::new();

    let response = client.get(server.url(FEED_QUERY)).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "application/json; charset=utf-8"
    );
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(response.headers()["x-cache"], "MISS");

    let body = json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["count"], 2);
    assert_eq!(body["source"], "https://example.com/atom.xml");
    assert_eq!(body["items"][0]["title"], "Ben & Jerry");
    assert_eq!(body["items"][0]["link"], "https://example.com/posts/1");
    assert_eq!(body["items"][0]["pubDate"], "2024-01-01T00:00:00Z");
    assert_eq!(body["items"][0]["content"], "<p>Hello</p>");
    assert_eq!(body["items"][1]["link"], "https://example.com/posts/2");
    assert_eq!(body["items"][1]["content"], "Short");

    wait_for_cache(cache.as_ref()).await;

    let again = client.get(server.url(FEED_QUERY)).send().await.unwrap();
    assert_eq!(again.headers()["x-cache"], "HIT");
    assert_eq!(server.calls(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_any_path_is_served() {
    let server = TestServer::start(ATOM, Arc::new(MemoryCache::new(4))).await;

    let response = reqwest::get(server.url("/api/feed?rss_url=https://example.com/atom.xml"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    server.stop().await;
}

#[tokio::test]
async fn test_error_responses_over_http() {
    let server = TestServer::start(ATOM, Arc::new(MemoryCache::new(4))).await;
    let client = reqwest::Client::new();

    let missing = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(missing.status(), 400);
    assert_eq!(missing.headers()["cache-control"], "no-store");
    let body = json(missing).await;
    assert_eq!(body["error"], "Missing rss_url param");

    let private = client
        .get(server.url("/?rss_url=http://127.0.0.1:8080/feed"))
        .send()
        .await
        .unwrap();
    assert_eq!(private.status(), 400);
    let body = json(private).await;
    assert_eq!(body["error"], "URL rejected: private-host");

    let delete = client.delete(server.url(FEED_QUERY)).send().await.unwrap();
    assert_eq!(delete.status(), 405);
    assert_eq!(delete.headers()["access-control-allow-origin"], "*");

    assert_eq!(server.calls(), 0);
    server.stop().await;
}

#[tokio::test]
async fn test_preflight_and_head() {
    let server = TestServer::start(ATOM, Arc::new(MemoryCache::new(4))).await;
    let client = reqwest::Client::new();

    let preflight = client
        .request(reqwest::Method::OPTIONS, server.url(FEED_QUERY))
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status(), 200);
    assert_eq!(preflight.headers()["access-control-allow-methods"], "GET, OPTIONS");
    assert!(preflight.bytes().await.unwrap().is_empty());

    let head = client.head(server.url(FEED_QUERY)).send().await.unwrap();
    assert_eq!(head.status(), 200);
    assert_eq!(head.headers()["content-type"], "application/json; charset=utf-8");
    assert!(head.bytes().await.unwrap().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_sqlite_backed_cache() {
    let cache = Arc::new(SqliteCache::open(":memory:").await.unwrap());
    let server = TestServer::start(ATOM, cache.clone()).await;
    let client = reqwest::Client::new();

    let first = client.get(server.url(FEED_QUERY)).send().await.unwrap();
    let first_etag = first.headers()["etag"].clone();
    wait_for_cache(cache.as_ref()).await;

    let second = client.get(server.url(FEED_QUERY)).send().await.unwrap();
    assert_eq!(second.headers()["x-cache"], "HIT");
    assert_eq!(second.headers()["etag"], first_etag);
    assert_eq!(server.calls(), 1);

    server.stop().await;
}
