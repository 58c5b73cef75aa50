//! Feed parsing and upstream fetching.
//!
//! - **Parsing**: Convert RSS/Atom XML into a flat list of [`FeedItem`]s
//! - **Fetching**: HTTP retrieval with retry, backoff, body limits and
//!   redirect re-validation
//!
//! # Architecture
//!
//! - [`parser`] - RSS/Atom item extraction on top of a tolerant tag scanner
//! - [`fetcher`] - The [`Upstream`] seam and its reqwest implementation
//!
//! # Example
//!
//! ```
//! use feedrelay::feed::parse_feed;
//!
//! let items = parse_feed("<rss><channel><item><title>Hi</title></item></channel></rss>");
//! assert_eq!(items[0].title, "Hi");
//! ```

pub mod fetcher;
pub mod parser;
mod scan;

pub use fetcher::{guarded_client, FetchError, HttpUpstream, RetryPolicy, Upstream, FEED_ACCEPT};
pub use parser::{parse_feed, parse_feed_with_base, FeedItem};
