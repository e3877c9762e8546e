//! SQLite-backed counter store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

use super::{CounterStore, StoreError};
use crate::ratelimit::RateWindow;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS rate_limits (
        key TEXT PRIMARY KEY NOT NULL,
        count INTEGER NOT NULL,
        window_start TEXT NOT NULL,
        window_seconds INTEGER NOT NULL,
        updated_at TEXT NOT NULL
    )
"#;

#[derive(Debug, sqlx::FromRow)]
struct WindowRow {
    key: String,
    count: i64,
    window_start: DateTime<Utc>,
    window_seconds: i64,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WindowRow> for RateWindow {
    type Error = StoreError;

    fn try_from(row: WindowRow) -> Result<Self, Self::Error> {
        let count = u64::try_from(row.count).map_err(|_| {
            StoreError::Corrupt(format!("{}: negative count {}", row.key, row.count))
        })?;
        let window_seconds = u64::try_from(row.window_seconds).map_err(|_| {
            StoreError::Corrupt(format!(
                "{}: negative window_seconds {}",
                row.key, row.window_seconds
            ))
        })?;
        Ok(RateWindow {
            key: row.key,
            count,
            window_start: row.window_start,
            window_seconds,
            updated_at: row.updated_at,
        })
    }
}

fn to_i64(key: &str, field: &str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{}: {} out of range", key, field)))
}

fn db_error(key: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            StoreError::Duplicate(key.to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        other => StoreError::Database(other),
    }
}

/// A counter store persisted in a SQLite `rate_limits` table.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and ensure the table exists.
    ///
    /// In-memory databases are per-connection, so `sqlite::memory:` should be
    /// used with `max_connections = 1`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool);
        store.migrate().await?;
        info!(url = %url, "SQLite counter store ready");
        Ok(store)
    }

    /// Wrap an existing pool. The caller is responsible for [`SqliteStore::migrate`].
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `rate_limits` table if it does not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CounterStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<RateWindow>, StoreError> {
        let row = sqlx::query_as::<_, WindowRow>(
            r#"
            SELECT key, count, window_start, window_seconds, updated_at
            FROM rate_limits
            WHERE key = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(key, e))?;

        row.map(RateWindow::try_from).transpose()
    }

    async fn insert(&self, window: &RateWindow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO rate_limits (key, count, window_start, window_seconds, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&window.key)
        .bind(to_i64(&window.key, "count", window.count)?)
        .bind(window.window_start)
        .bind(to_i64(&window.key, "window_seconds", window.window_seconds)?)
        .bind(window.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(&window.key, e))?;

        Ok(())
    }

    async fn update(&self, window: &RateWindow) -> Result<(), StoreError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE rate_limits
            SET count = ?1, window_start = ?2, window_seconds = ?3, updated_at = ?4
            WHERE key = ?5
            "#,
        )
        .bind(to_i64(&window.key, "count", window.count)?)
        .bind(window.window_start)
        .bind(to_i64(&window.key, "window_seconds", window.window_seconds)?)
        .bind(window.updated_at)
        .bind(&window.key)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(&window.key, e))?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::Missing(window.key.clone()));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM rate_limits WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(key, e))?;
        Ok(())
    }
}
