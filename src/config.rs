//! Configuration for the proxy: an optional TOML file plus environment overrides.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
//!
//! Environment variables applied by [`Config::apply_env`]:
//!
//! - `ALLOW_HOSTS`: comma-separated upstream host allow-list (replaces `allow_hosts`)
//! - `FEEDRELAY_BIND`: listen address (replaces `bind`)
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::util::parse_allow_hosts;

// ============================================================================
// Policy Defaults
// ============================================================================

/// Items returned when `count` is absent or not a number.
pub const DEFAULT_COUNT: usize = 50;
/// Smallest accepted `count`.
pub const MIN_COUNT: usize = 1;
/// Largest accepted `count`.
pub const MAX_COUNT: usize = 100;

/// Total upstream attempts per cache miss (first try included).
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// Backoff before the second attempt; doubles for each further attempt.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 250;
/// Per-attempt upstream timeout.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 8;
/// Largest upstream body accepted (5MB).
pub const MAX_FEED_BYTES: usize = 5 * 1024 * 1024;

/// Freshness window advertised in `cache-control: max-age`.
pub const DEFAULT_MAX_AGE_SECS: u64 = 600;
/// Extra window during which a stale response may be served while refreshing.
pub const DEFAULT_STALE_WHILE_REVALIDATE_SECS: u64 = 600;
/// Entries kept by the in-memory cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 512;
/// How often the SQLite cache drops expired rows.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 900;

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_USER_AGENT: &str = concat!("feedrelay/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level proxy configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Socket address to listen on.
    pub bind: String,

    /// Permitted upstream hosts (exact or parent-domain match). Empty = any public host.
    pub allow_hosts: Vec<String>,

    pub upstream: UpstreamConfig,

    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            allow_hosts: Vec::new(),
            upstream: UpstreamConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

/// Upstream fetch policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub attempts: u32,
    pub backoff_base_ms: u64,
    pub timeout_secs: u64,
    pub max_body_bytes: usize,
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
            max_body_bytes: MAX_FEED_BYTES,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl UpstreamConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Which store backs the response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Sqlite,
}

/// Response cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// SQLite database file (sqlite backend only).
    pub path: PathBuf,
    /// Entry limit (memory backend only).
    pub capacity: usize,
    pub max_age_secs: u64,
    pub stale_while_revalidate_secs: u64,
    /// Expired-row sweep period (sqlite backend only).
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            path: PathBuf::from("feedrelay-cache.db"),
            capacity: DEFAULT_CACHE_CAPACITY,
            max_age_secs: DEFAULT_MAX_AGE_SECS,
            stale_while_revalidate_secs: DEFAULT_STALE_WHILE_REVALIDATE_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn stale_while_revalidate(&self) -> Duration {
        Duration::from_secs(self.stale_while_revalidate_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to prevent memory exhaustion
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::from_toml(&content)?;
        tracing::info!(
            path = %path.display(),
            bind = %config.bind,
            backend = ?config.cache.backend,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text, warning about unknown top-level keys.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["bind", "allow_hosts", "upstream", "cache"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let mut config: Config = toml::from_str(content)?;
        config.allow_hosts = parse_allow_hosts(&config.allow_hosts.join(","));
        Ok(config)
    }

    /// Apply `ALLOW_HOSTS` and `FEEDRELAY_BIND` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var("ALLOW_HOSTS").ok().as_deref(),
            std::env::var("FEEDRELAY_BIND").ok().as_deref(),
        );
    }

    /// Apply explicit override values; `None` leaves the current setting alone.
    ///
    /// An `ALLOW_HOSTS` value that is present but blank clears the allow-list.
    pub fn apply_overrides(&mut self, allow_hosts: Option<&str>, bind: Option<&str>) {
        if let Some(raw) = allow_hosts {
            self.allow_hosts = parse_allow_hosts(raw);
            tracing::debug!(hosts = ?self.allow_hosts, "Upstream allow-list set from environment");
        }
        if let Some(bind) = bind.map(str::trim).filter(|b| !b.is_empty()) {
            self.bind = bind.to_string();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind, DEFAULT_BIND);
        assert!(config.allow_hosts.is_empty());
        assert_eq!(config.upstream.attempts, 3);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.cache.max_age(), Duration::from_secs(600));
        assert_eq!(config.cache.stale_while_revalidate(), Duration::from_secs(600));
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedrelay_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.bind, DEFAULT_BIND);
    }

    #[test]
    fn test_empty_file_returns_default() {
        let dir = std::env::temp_dir().join("feedrelay_config_test_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "   \n  ").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.bind, DEFAULT_BIND);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let config = Config::from_toml("[upstream]\nattempts = 5\n").unwrap();
        assert_eq!(config.upstream.attempts, 5);
        assert_eq!(config.upstream.timeout_secs, DEFAULT_UPSTREAM_TIMEOUT_SECS);
        assert_eq!(config.cache.capacity, DEFAULT_CACHE_CAPACITY);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
bind = "0.0.0.0:9000"
allow_hosts = ["Substack.com", ".example.org"]

[upstream]
attempts = 2
backoff_base_ms = 50
timeout_secs = 3
max_body_bytes = 1024
user_agent = "test-agent"

[cache]
backend = "sqlite"
path = "/var/cache/feedrelay.db"
capacity = 10
max_age_secs = 300
stale_while_revalidate_secs = 900
sweep_interval_secs = 60
"#;
        let config = Config::from_toml(content).unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.allow_hosts, vec!["substack.com", "example.org"]);
        assert_eq!(config.upstream.attempts, 2);
        assert_eq!(config.upstream.backoff_base(), Duration::from_millis(50));
        assert_eq!(config.upstream.timeout(), Duration::from_secs(3));
        assert_eq!(config.upstream.max_body_bytes, 1024);
        assert_eq!(config.upstream.user_agent, "test-agent");
        assert_eq!(config.cache.backend, CacheBackend::Sqlite);
        assert_eq!(config.cache.path, PathBuf::from("/var/cache/feedrelay.db"));
        assert_eq!(config.cache.max_age_secs, 300);
        assert_eq!(config.cache.sweep_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let result = Config::from_toml("this is not [valid toml");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let result = Config::from_toml("[cache]\nbackend = \"redis\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::from_toml("bind = \"127.0.0.1:1\"\ntotally_fake_key = 1\n").unwrap();
        assert_eq!(config.bind, "127.0.0.1:1");
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("feedrelay_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::from_toml("allow_hosts = [\"a.com\"]\n").unwrap();

        config.apply_overrides(None, None);
        assert_eq!(config.allow_hosts, vec!["a.com"]);
        assert_eq!(config.bind, DEFAULT_BIND);

        config.apply_overrides(Some("example.com, blog.test"), Some(" 0.0.0.0:80 "));
        assert_eq!(config.allow_hosts, vec!["example.com", "blog.test"]);
        assert_eq!(config.bind, "0.0.0.0:80");

        config.apply_overrides(Some(""), Some(""));
        assert!(config.allow_hosts.is_empty());
        assert_eq!(config.bind, "0.0.0.0:80");
    }

    #[test]
    fn test_timeout_never_zero() {
        let config = Config::from_toml("[upstream]\ntimeout_secs = 0\n").unwrap();
        assert_eq!(config.upstream.timeout(), Duration::from_secs(1));
    }
}
