use axum::body::Bytes;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::ProxyError;
use crate::cache::CachedResponse;
use crate::feed::FeedItem;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Whether the response came from the cache, reported in `x-cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Miss,
    Hit,
    Stale,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Miss => "MISS",
            CacheStatus::Hit => "HIT",
            CacheStatus::Stale => "STALE",
        }
    }
}

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

const CORS_HEADERS: [(HeaderName, &str); 3] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS"),
    (header::ACCESS_CONTROL_ALLOW_HEADERS, "content-type"),
];

#[derive(Serialize)]
struct OkEnvelope<'a> {
    status: &'static str,
    items: &'a [FeedItem],
    count: usize,
    source: &'a str,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    status: &'static str,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<u16>,
}

/// A finished HTTP response, independent of the server framework.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    /// Empty CORS preflight answer.
    pub fn preflight() -> Self {
        let mut headers = HeaderMap::new();
        apply_cors(&mut headers);
        Self {
            status: StatusCode::OK,
            headers,
            body: Bytes::new(),
        }
    }

    /// Error envelope `{status: "error", error, code?}`; never cached.
    pub fn error(err: &ProxyError) -> Self {
        let envelope = ErrorEnvelope {
            status: "error",
            error: err.to_string(),
            code: err.code(),
        };
        // Serializing a struct of strings and integers cannot fail
        let body = serde_json::to_vec(&envelope).unwrap_or_default();

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        apply_cors(&mut headers);

        Self {
            status: err.status(),
            headers,
            body: Bytes::from(body),
        }
    }

    /// Rebuilds a stored response, adding CORS and `x-cache`.
    ///
    /// Stored headers that are not valid HTTP header values are skipped.
    pub fn from_cached(cached: CachedResponse, cache_status: CacheStatus) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in &cached.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => tracing::warn!(header = %name, "Skipping invalid stored header"),
            }
        }
        headers.insert(X_CACHE, HeaderValue::from_static(cache_status.as_str()));
        apply_cors(&mut headers);

        Self {
            status: StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK),
            headers,
            body: Bytes::from(cached.body),
        }
    }
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

/// Builds the cacheable success response for `items` fetched from `source`.
///
/// CORS headers are left off; they are added on every send instead.
pub fn success_response(
    items: &[FeedItem],
    source: &str,
    cache_control: &str,
) -> Result<CachedResponse, ProxyError> {
    let envelope = OkEnvelope {
        status: "ok",
        items,
        count: items.len(),
        source,
    };
    let body = serde_json::to_string(&envelope)
        .map_err(|e| ProxyError::Unexpected(format!("Failed to serialize response: {e}")))?;

    Ok(CachedResponse {
        status: StatusCode::OK.as_u16(),
        headers: vec![
            (header::CONTENT_TYPE.as_str().to_owned(), JSON_CONTENT_TYPE.to_string()),
            (header::CACHE_CONTROL.as_str().to_owned(), cache_control.to_string()),
            (header::ETAG.as_str().to_owned(), etag(body.as_bytes())),
        ],
        body,
    })
}

/// Strong ETag: quoted hex of the first 16 bytes of the body's SHA-256.
fn etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    let hex: String = digest[..16].iter().map(|b| format!("{b:02x}")).collect();
    format!("\"{hex}\"")
}

fn apply_cors(headers: &mut HeaderMap) {
    for (name, value) in CORS_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
}
