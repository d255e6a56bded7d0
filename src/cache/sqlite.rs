use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::{
    CacheBackend, CacheError, CacheFactory, CacheImplementation, CacheKey, CacheMetadata,
    CachedEntry,
};

type EntryRow = (Vec<u8>, String, Option<String>, Option<i64>, Option<i64>, i64);

/// SQLite-backed cache. Supports the factory convention only.
///
/// One pool is opened up front; [`CacheFactory::handler`] hands out cheap
/// per-key handles onto it. Each entry is a single row, so a write replaces
/// body and metadata together.
#[derive(Debug, Clone)]
pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    /// Opens (creating if needed) the cache database at `path` and runs migrations.
    ///
    /// `":memory:"` opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the database cannot be opened or migrated.
    pub async fn open(path: &str) -> Result<Self, CacheError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() {
                // Create with 0600 before SQLite opens it; on failure SQLite reports the error
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok();
            }
        }

        let options = SqliteConnectOptions::from_str(&url)?.pragma("busy_timeout", "5000");
        // An in-memory database exists per connection
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let cache = Self { pool };
        cache.migrate().await?;
        Ok(cache)
    }

    async fn migrate(&self) -> Result<(), CacheError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_cache (
                location TEXT NOT NULL,
                name TEXT NOT NULL,
                extension TEXT NOT NULL,
                body BLOB NOT NULL,
                feed_url TEXT NOT NULL,
                etag TEXT,
                last_modified INTEGER,
                max_age_secs INTEGER,
                stored_at INTEGER NOT NULL,
                PRIMARY KEY (location, name, extension)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Number of stored entries across all keys.
    pub async fn entry_count(&self) -> Result<i64, CacheError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feed_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

impl CacheImplementation for SqliteCache {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn as_factory(&self) -> Option<&dyn CacheFactory> {
        Some(self)
    }
}

impl CacheFactory for SqliteCache {
    fn handler(&self, key: &CacheKey) -> Result<Arc<dyn CacheBackend>, CacheError> {
        Ok(Arc::new(SqliteEntry {
            pool: self.pool.clone(),
            key: key.clone(),
        }))
    }
}

struct SqliteEntry {
    pool: SqlitePool,
    key: CacheKey,
}

#[async_trait]
impl CacheBackend for SqliteEntry {
    fn key(&self) -> &CacheKey {
        &self.key
    }

    async fn load(&self) -> Result<Option<CachedEntry>, CacheError> {
        let row: Option<EntryRow> = sqlx::query_as(
            r#"
            SELECT body, feed_url, etag, last_modified, max_age_secs, stored_at
            FROM feed_cache
            WHERE location = ? AND name = ? AND extension = ?
        "#,
        )
        .bind(&self.key.location)
        .bind(&self.key.name)
        .bind(&self.key.extension)
        .fetch_optional(&self.pool)
        .await?;

        row.map(entry_from_row).transpose()
    }

    async fn write(&self, entry: CachedEntry) -> Result<(), CacheError> {
        let meta = &entry.metadata;
        let max_age_secs = meta
            .max_age
            .map(|age| i64::try_from(age.as_secs()).unwrap_or(i64::MAX));

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO feed_cache
                (location, name, extension, body, feed_url, etag, last_modified, max_age_secs, stored_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&self.key.location)
        .bind(&self.key.name)
        .bind(&self.key.extension)
        .bind(&entry.body)
        .bind(&meta.feed_url)
        .bind(meta.etag.as_deref())
        .bind(meta.last_modified.map(|t| t.timestamp()))
        .bind(max_age_secs)
        .bind(meta.stored_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch(&self, stored_at: DateTime<Utc>) -> Result<bool, CacheError> {
        let result = sqlx::query(
            "UPDATE feed_cache SET stored_at = ? WHERE location = ? AND name = ? AND extension = ?",
        )
        .bind(stored_at.timestamp_millis())
        .bind(&self.key.location)
        .bind(&self.key.name)
        .bind(&self.key.extension)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM feed_cache WHERE location = ? AND name = ? AND extension = ?")
            .bind(&self.key.location)
            .bind(&self.key.name)
            .bind(&self.key.extension)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn entry_from_row(row: EntryRow) -> Result<CachedEntry, CacheError> {
    let (body, feed_url, etag, last_modified, max_age_secs, stored_at) = row;

    let stored_at = DateTime::from_timestamp_millis(stored_at)
        .ok_or_else(|| CacheError::Storage(format!("invalid stored_at: {stored_at}")))?;

    Ok(CachedEntry {
        body,
        metadata: CacheMetadata {
            feed_url,
            etag,
            last_modified: last_modified.and_then(|secs| DateTime::from_timestamp(secs, 0)),
            max_age: max_age_secs.map(|secs| Duration::from_secs(secs.max(0) as u64)),
            stored_at,
        },
    })
}
