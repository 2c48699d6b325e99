//! Database module for the media library.
//!
//! This module provides the persistence layer using SQLite with sqlx:
//! pool setup, migrations, immediate transactions, models and repositories.

pub mod models;
pub mod repositories;
pub mod retry;
pub mod time;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Default connection pool size.
const DEFAULT_POOL_SIZE: u32 = 8;

/// Default busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

/// Default cache size (negative means KiB, so this is 32MB).
const DEFAULT_CACHE_SIZE_KB: i32 = -32000;

async fn apply_per_connection_pragmas(
    conn: &mut sqlx::SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query(&format!("PRAGMA cache_size = {}", DEFAULT_CACHE_SIZE_KB))
        .execute(&mut *conn)
        .await?;

    sqlx::query("PRAGMA temp_store = MEMORY")
        .execute(&mut *conn)
        .await?;

    Ok(())
}

async fn ensure_wal_mode(pool: &DbPool) -> Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let row = sqlx::query("PRAGMA journal_mode")
        .fetch_one(&mut *conn)
        .await?;
    let mode: String = row.get(0);
    if mode != "wal" && mode != "memory" {
        tracing::warn!("journal_mode was '{}', expected 'wal'; re-setting", mode);
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Initialize the database connection pool with WAL mode.
///
/// # Arguments
/// * `database_url` - SQLite database URL (e.g., "sqlite:media-library.db?mode=rwc")
/// * `max_connections` - Maximum number of connections in the pool
pub async fn init_pool_with_size(
    database_url: &str,
    max_connections: u32,
) -> Result<DbPool, sqlx::Error> {
    let connect_options = SqliteConnectOptions::from_str(database_url)?
        // Enable WAL mode for concurrent reads during writes
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        // Writers queue behind BEGIN IMMEDIATE instead of failing fast
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .after_connect(|conn, _meta| {
            Box::pin(async move { apply_per_connection_pragmas(&mut *conn).await })
        })
        .connect_with(connect_options)
        .await?;

    ensure_wal_mode(&pool).await?;

    tracing::info!(
        "Database pool initialized with WAL mode, {} max connections",
        max_connections
    );

    Ok(pool)
}

/// Initialize the database connection pool with default size.
pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    init_pool_with_size(database_url, DEFAULT_POOL_SIZE).await
}

pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

pub async fn begin_immediate(pool: &DbPool) -> Result<ImmediateTransaction, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
    Ok(ImmediateTransaction::new(conn))
}

/// Wrapper for a manual immediate transaction.
///
/// BEGIN IMMEDIATE takes the write lock up front, so a read-then-write
/// sequence (read a position, then shift neighbours) cannot deadlock against
/// another writer that upgraded first.
pub struct ImmediateTransaction {
    conn: sqlx::pool::PoolConnection<Sqlite>,
    finished: bool,
}

impl ImmediateTransaction {
    pub fn new(conn: sqlx::pool::PoolConnection<Sqlite>) -> Self {
        Self {
            conn,
            finished: false,
        }
    }

    /// Commit the transaction.
    pub async fn commit(mut self) -> Result<(), sqlx::Error> {
        sqlx::query("COMMIT").execute(&mut *self.conn).await?;
        self.finished = true;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), sqlx::Error> {
        sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
        self.finished = true;
        Ok(())
    }
}

impl std::ops::Deref for ImmediateTransaction {
    type Target = sqlx::SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl std::ops::DerefMut for ImmediateTransaction {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for ImmediateTransaction {
    fn drop(&mut self) {
        // An unfinished transaction must not go back to the pool mid-flight;
        // closing the connection makes SQLite roll it back.
        if !self.finished {
            self.conn.close_on_drop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn file_pool(dir: &tempfile::TempDir) -> DbPool {
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("test.db").display());
        init_pool(&url).await.unwrap()
    }

    #[tokio::test]
    async fn test_init_pool_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir).await;

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(result.0, "wal");
    }

    #[tokio::test]
    async fn test_migrations_create_collections() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir).await;
        run_migrations(&pool).await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(names.contains(&"stills"));
        assert!(names.contains(&"videos"));
        assert!(names.contains(&"tracks"));
    }

    #[tokio::test]
    async fn test_immediate_transaction_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir).await;
        run_migrations(&pool).await.unwrap();

        let mut tx = begin_immediate(&pool).await.unwrap();
        sqlx::query(
            "INSERT INTO stills (id, hash, position, created_at, updated_at) VALUES ('a', 'h', 0, 0, 0)",
        )
        .execute(&mut *tx)
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stills")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn test_dropped_transaction_is_not_committed() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir).await;
        run_migrations(&pool).await.unwrap();

        {
            let mut tx = begin_immediate(&pool).await.unwrap();
            sqlx::query(
                "INSERT INTO stills (id, hash, position, created_at, updated_at) VALUES ('a', 'h', 0, 0, 0)",
            )
            .execute(&mut *tx)
            .await
            .unwrap();
        }

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stills")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }
}
