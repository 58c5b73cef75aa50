use async_trait::async_trait;
use futures::StreamExt;
use reqwest::redirect::Policy;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::{DEFAULT_BACKOFF_BASE_MS, DEFAULT_RETRY_ATTEMPTS, DEFAULT_UPSTREAM_TIMEOUT_SECS};
use crate::util::safe_feed_url;

/// `Accept` header sent with every upstream request.
pub const FEED_ACCEPT: &str =
    "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.5";

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 5;

/// Errors that can occur while fetching an upstream feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, rejected redirect, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// A single attempt exceeded the per-attempt timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl FetchError {
    /// Upstream HTTP status, when the failure was a non-success response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus(status) => Some(*status),
            FetchError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Oversized bodies and redirects refused by the URL policy fail the
    /// same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::ResponseTooLarge => false,
            FetchError::Network(e) => !e.is_redirect(),
            _ => true,
        }
    }
}

/// Source of raw feed documents.
///
/// The proxy only talks to upstreams through this trait, so tests can
/// substitute an in-process fake.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Fetch the document at `url`, retrying per the implementation's policy.
    async fn fetch(&self, url: &Url) -> Result<String, FetchError>;
}

/// Attempt count and pacing for upstream fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Zero is treated as one.
    pub attempts: u32,
    /// Delay before the second attempt; doubles for each attempt after that.
    pub base_delay: Duration,
    /// Deadline for a single attempt, body read included.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            attempt_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the `attempt`-th failure (1-based): `base * 2^(attempt-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Builds the reqwest client used for upstream fetches.
///
/// Every redirect hop is re-checked with [`safe_feed_url`], so a public feed
/// URL cannot bounce the proxy to a private address.
pub fn guarded_client(
    allow_hosts: Arc<[String]>,
    user_agent: &str,
    connect_timeout: Duration,
) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .redirect(redirect_policy(allow_hosts))
        .connect_timeout(connect_timeout)
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
}

fn redirect_policy(allow_hosts: Arc<[String]>) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("Too many redirects (max {MAX_REDIRECTS})"));
        }

        if let Err(rejection) = safe_feed_url(attempt.url().as_str(), &allow_hosts) {
            tracing::warn!(
                to = %attempt.url(),
                reason = rejection.reason(),
                "Refusing redirect"
            );
            return attempt.error(rejection);
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %attempt.url(),
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// [`Upstream`] backed by a reqwest client.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    retry: RetryPolicy,
    max_body_bytes: usize,
}

impl HttpUpstream {
    pub fn new(client: reqwest::Client, retry: RetryPolicy, max_body_bytes: usize) -> Self {
        Self {
            client,
            retry,
            max_body_bytes,
        }
    }

    async fn attempt(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, FEED_ACCEPT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, self.max_body_bytes).await
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;

        let bytes = loop {
            let result = tokio::time::timeout(self.retry.attempt_timeout, self.attempt(url))
                .await
                .unwrap_or(Err(FetchError::Timeout));

            match result {
                Ok(bytes) => break bytes,
                Err(e) if attempt < attempts && e.is_retryable() => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        feed = %url,
                        error = %e,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Upstream fetch failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::debug!(feed = %url, error = %e, attempt = attempt, "Upstream fetch failed");
                    return Err(e);
                }
            }
        };

        tracing::debug!(feed = %url, bytes = bytes.len(), attempt = attempt, "Fetched upstream feed");
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // Connection dropped mid-body
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
