use axum::http::Uri;

use super::ProxyError;
use crate::config::{DEFAULT_COUNT, MAX_COUNT, MIN_COUNT};

/// Query parameters of a feed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    /// Raw, not yet validated feed URL.
    pub rss_url: String,
    /// Item limit, already clamped into `MIN_COUNT..=MAX_COUNT`.
    pub count: usize,
}

impl FeedQuery {
    /// Extracts `rss_url` and `count` from the request URI.
    ///
    /// The first occurrence of each parameter wins. A missing or blank
    /// `rss_url` is an error.
    pub fn from_uri(uri: &Uri) -> Result<Self, ProxyError> {
        let query = uri.query().unwrap_or("");
        let mut rss_url = None;
        let mut count = None;

        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match name.as_ref() {
                "rss_url" if rss_url.is_none() => rss_url = Some(value.into_owned()),
                "count" if count.is_none() => count = Some(value.into_owned()),
                _ => {}
            }
        }

        let rss_url = rss_url
            .filter(|url| !url.trim().is_empty())
            .ok_or(ProxyError::MissingUrl)?;

        Ok(Self {
            rss_url,
            count: clamp_count(count.as_deref()),
        })
    }
}

/// Normalizes the `count` parameter.
///
/// Integers are clamped into `[MIN_COUNT, MAX_COUNT]`, including ones too
/// large to represent; anything else (absent, empty, non-numeric) yields
/// `DEFAULT_COUNT`.
///
/// ```
/// use feedrelay::proxy::clamp_count;
///
/// assert_eq!(clamp_count(Some("0")), 1);
/// assert_eq!(clamp_count(Some("500")), 100);
/// assert_eq!(clamp_count(Some("abc")), 50);
/// assert_eq!(clamp_count(None), 50);
/// ```
pub fn clamp_count(raw: Option<&str>) -> usize {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return DEFAULT_COUNT;
    };

    let (negative, digits) = match raw.as_bytes()[0] {
        b'-' => (true, &raw[1..]),
        b'+' => (false, &raw[1..]),
        _ => (false, raw),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return DEFAULT_COUNT;
    }
    if negative {
        return MIN_COUNT;
    }

    // Overflow only happens for values far above the ceiling
    digits
        .parse::<usize>()
        .map_or(MAX_COUNT, |n| n.clamp(MIN_COUNT, MAX_COUNT))
}
