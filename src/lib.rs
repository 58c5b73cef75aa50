//! Caching RSS/Atom to JSON proxy.
//!
//! A request `GET /?rss_url=<feed>&count=<n>` is validated against an SSRF
//! policy, answered from cache when possible, and otherwise fetched, parsed
//! and returned as `{"status":"ok","items":[...],"count":N,"source":"..."}`.

pub mod cache;
pub mod config;
pub mod feed;
pub mod proxy;
pub mod server;
pub mod util;

pub use config::Config;
pub use proxy::{Proxy, ProxySettings};
