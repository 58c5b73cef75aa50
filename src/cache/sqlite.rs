use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use super::{CacheError, CacheHit, CacheKey, CacheStore, CachedResponse, Freshness};

/// Persistent response cache in a SQLite table.
///
/// Expiry times are unix seconds. Expired rows are invisible to [`get`](CacheStore::get)
/// and are deleted by [`SqliteCache::evict_expired`], which the server runs periodically.
#[derive(Clone)]
pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    /// Opens (creating if needed) the cache database at `path`.
    ///
    /// `":memory:"` opens a private in-memory database, useful for tests.
    pub async fn open(path: &str) -> Result<Self, CacheError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: wait up to 5 seconds for locks instead of failing with SQLITE_BUSY
        let options = SqliteConnectOptions::from_str(&url)?.pragma("busy_timeout", "5000");

        // Every :memory: connection is a separate database, so pin a single one
        let mut pool_options = SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(10));
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        let cache = Self { pool };
        cache.migrate().await?;
        tracing::debug!(path = %path, "Opened SQLite response cache");
        Ok(cache)
    }

    async fn migrate(&self) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS response_cache (
                cache_key   TEXT PRIMARY KEY,
                response    TEXT NOT NULL,
                stored_at   INTEGER NOT NULL,
                fresh_until INTEGER NOT NULL,
                stale_until INTEGER NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Migrate(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_response_cache_stale_until ON response_cache(stale_until)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Migrate(e.to_string()))?;

        Ok(())
    }

    /// Delete all entries past their stale window.
    ///
    /// Returns the number of entries evicted.
    pub async fn evict_expired(&self) -> Result<u64, CacheError> {
        self.evict_expired_at(Utc::now()).await
    }

    async fn evict_expired_at(&self, now: DateTime<Utc>) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM response_cache WHERE stale_until <= ?")
            .bind(now.timestamp())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn get_at(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheHit>, CacheError> {
        let row: Option<(String, i64)> = sqlx::query_as(
            r#"
            SELECT response, fresh_until
            FROM response_cache
            WHERE cache_key = ? AND stale_until > ?
        "#,
        )
        .bind(key.as_str())
        .bind(now.timestamp())
        .fetch_optional(&self.pool)
        .await?;

        let Some((json, fresh_until)) = row else {
            return Ok(None);
        };

        let response: CachedResponse = serde_json::from_str(&json)?;
        let freshness = if now.timestamp() < fresh_until {
            Freshness::Fresh
        } else {
            Freshness::Stale
        };

        Ok(Some(CacheHit {
            response,
            freshness,
        }))
    }

    async fn put_at(
        &self,
        key: &CacheKey,
        response: CachedResponse,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let Some(ttl) = response.ttl() else {
            tracing::debug!(key = %key, "Response not cacheable, skipping store");
            return Ok(());
        };

        let stored_at = now.timestamp();
        let fresh_until = stored_at.saturating_add(seconds(ttl.max_age));
        let stale_until = fresh_until.saturating_add(seconds(ttl.stale_while_revalidate));
        let json = serde_json::to_string(&response)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO response_cache
                (cache_key, response, stored_at, fresh_until, stale_until)
            VALUES (?, ?, ?, ?, ?)
        "#,
        )
        .bind(key.as_str())
        .bind(&json)
        .bind(stored_at)
        .bind(fresh_until)
        .bind(stale_until)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn seconds(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheHit>, CacheError> {
        self.get_at(key, Utc::now()).await
    }

    async fn put(&self, key: &CacheKey, response: CachedResponse) -> Result<(), CacheError> {
        self.put_at(key, response, Utc::now()).await
    }
}
