//! Utility functions for common operations.
//!
//! This module provides reusable utilities for:
//!
//! - **URL validation**: SSRF policy for upstream feed URLs, including the
//!   optional host allow-list
//! - **Text processing**: entity decoding, whitespace normalization and
//!   HTML sniffing of fetched bodies
//!
//! # Examples
//!
//! ```
//! use feedrelay::util::{collapse_whitespace, decode_entities, safe_feed_url};
//!
//! // Validate a feed URL
//! let url = safe_feed_url("https://example.com/feed.xml", &[]).unwrap();
//!
//! // Normalize extracted feed text
//! let title = collapse_whitespace(&decode_entities("  Tom &amp;\n Jerry "));
//! assert_eq!(title, "Tom & Jerry");
//! ```

mod text;
mod url_validator;

pub use text::{collapse_whitespace, decode_entities, looks_like_html, REPLACEMENT_CHAR};
pub use url_validator::{is_private_host, parse_allow_hosts, safe_feed_url, UrlRejection};
