use axum::http::StatusCode;
use thiserror::Error;

use crate::feed::FetchError;
use crate::util::UrlRejection;

/// Every way a feed request can fail.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Missing rss_url param")]
    MissingUrl,

    /// The feed URL failed the SSRF policy; the reason is surfaced to the caller.
    #[error("URL rejected: {0}")]
    Rejected(#[from] UrlRejection),

    #[error("Upstream fetch failed: {0}")]
    Upstream(#[from] FetchError),

    /// Upstream answered with an HTML page (outage or login wall) instead of a feed.
    #[error("Upstream returned HTML instead of a feed")]
    HtmlBody,

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::MissingUrl | ProxyError::Rejected(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) | ProxyError::HtmlBody => StatusCode::BAD_GATEWAY,
            ProxyError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Upstream HTTP status to report in the error envelope, when known.
    pub fn code(&self) -> Option<u16> {
        match self {
            ProxyError::Upstream(e) => e.status_code(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ProxyError::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(ProxyError::MissingUrl.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ProxyError::Rejected(UrlRejection::PrivateHost).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::Upstream(FetchError::Timeout).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(ProxyError::HtmlBody.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ProxyError::Unexpected("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_messages() {
        assert_eq!(ProxyError::MissingUrl.to_string(), "Missing rss_url param");
        assert_eq!(
            ProxyError::Rejected(UrlRejection::HostNotAllowed).to_string(),
            "URL rejected: host-not-allowed"
        );
    }

    #[test]
    fn test_code_only_for_upstream_status() {
        assert_eq!(ProxyError::Upstream(FetchError::HttpStatus(404)).code(), Some(404));
        assert_eq!(ProxyError::Upstream(FetchError::Timeout).code(), None);
        assert_eq!(ProxyError::HtmlBody.code(), None);
    }
}
