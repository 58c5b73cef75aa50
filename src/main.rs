use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use feedrelay::cache::{CacheStore, MemoryCache, SqliteCache};
use feedrelay::config::{CacheBackend, CacheConfig, Config};
use feedrelay::feed::{guarded_client, HttpUpstream, RetryPolicy};
use feedrelay::{server, Proxy, ProxySettings};

#[derive(Parser, Debug)]
#[command(name = "feedrelay", about = "Caching RSS/Atom to JSON proxy")]
struct Args {
    /// TOML config file (optional; defaults apply when missing)
    #[arg(long, value_name = "FILE", default_value = "feedrelay.toml")]
    config: PathBuf,

    /// Listen address, overriding the config file and FEEDRELAY_BIND
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (RUST_LOG controls verbosity)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config.display()))?;
    config.apply_env();
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    let cache = open_cache(&config.cache).await?;

    let allow_hosts: Arc<[String]> = Arc::from(config.allow_hosts.clone());
    if allow_hosts.is_empty() {
        tracing::info!("No upstream allow-list configured; any public host is permitted");
    } else {
        tracing::info!(hosts = ?allow_hosts, "Upstream allow-list active");
    }

    let client = guarded_client(
        Arc::clone(&allow_hosts),
        &config.upstream.user_agent,
        config.upstream.timeout(),
    )
    .context("Failed to build HTTP client")?;

    let retry = RetryPolicy {
        attempts: config.upstream.attempts,
        base_delay: config.upstream.backoff_base(),
        attempt_timeout: config.upstream.timeout(),
    };
    let upstream = Arc::new(HttpUpstream::new(client, retry, config.upstream.max_body_bytes));

    let settings = ProxySettings {
        allow_hosts,
        max_age: config.cache.max_age(),
        stale_while_revalidate: config.cache.stale_while_revalidate(),
    };
    let proxy = Proxy::new(settings, upstream, cache);

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind '{}'", config.bind))?;

    server::serve(listener, proxy, shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

/// Opens the configured cache backend; the SQLite one gets a periodic expiry sweep.
async fn open_cache(config: &CacheConfig) -> Result<Arc<dyn CacheStore>> {
    match config.backend {
        CacheBackend::Memory => {
            tracing::info!(capacity = config.capacity, "Using in-memory response cache");
            Ok(Arc::new(MemoryCache::new(config.capacity)))
        }
        CacheBackend::Sqlite => {
            let path = config
                .path
                .to_str()
                .context("Cache path is not valid UTF-8")?;
            let cache = SqliteCache::open(path)
                .await
                .with_context(|| format!("Failed to open cache database '{path}'"))?;
            tracing::info!(path = %path, "Using SQLite response cache");

            let sweeper = cache.clone();
            let period = config.sweep_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                // The first tick completes immediately
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    match sweeper.evict_expired().await {
                        Ok(0) => {}
                        Ok(evicted) => tracing::debug!(evicted, "Evicted expired cache entries"),
                        Err(e) => tracing::warn!(error = %e, "Cache sweep failed"),
                    }
                }
            });

            Ok(Arc::new(cache))
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
