//! Collection read repository.

use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::MediaRecord;
use crate::{Error, Result};

/// Read access to one collection, always ordered by position.
#[async_trait]
pub trait MediaRepository<R: MediaRecord>: Send + Sync {
    async fn get_all(&self) -> Result<Vec<R>>;
    /// Items with `position < threshold`.
    async fn list_below(&self, threshold: i64) -> Result<Vec<R>>;
    /// Items with `start <= position <= end`.
    async fn list_range(&self, start: i64, end: i64) -> Result<Vec<R>>;
    async fn count(&self) -> Result<i64>;
    async fn get(&self, id: &str) -> Result<R>;
    async fn exists(&self, id: &str) -> Result<bool>;
    async fn find_by_hash(&self, hash: &str) -> Result<Option<R>>;
}

/// SQLx implementation of [`MediaRepository`].
pub struct SqlxMediaRepository<R> {
    pool: SqlitePool,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for SqlxMediaRepository<R> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: MediaRecord> SqlxMediaRepository<R> {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            _record: PhantomData,
        }
    }

    fn table() -> &'static str {
        R::KIND.table()
    }
}

#[async_trait]
impl<R: MediaRecord> MediaRepository<R> for SqlxMediaRepository<R> {
    async fn get_all(&self) -> Result<Vec<R>> {
        let sql = format!("SELECT * FROM {} ORDER BY position ASC", Self::table());
        let items = sqlx::query_as::<_, R>(&sql).fetch_all(&self.pool).await?;
        Ok(items)
    }

    async fn list_below(&self, threshold: i64) -> Result<Vec<R>> {
        let sql = format!(
            "SELECT * FROM {} WHERE position >= 0 AND position < ? ORDER BY position ASC",
            Self::table()
        );
        let items = sqlx::query_as::<_, R>(&sql)
            .bind(threshold)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    async fn list_range(&self, start: i64, end: i64) -> Result<Vec<R>> {
        if start < 0 || end < start {
            return Err(Error::invalid(format!(
                "invalid position range {start}..={end}"
            )));
        }
        let sql = format!(
            "SELECT * FROM {} WHERE position BETWEEN ? AND ? ORDER BY position ASC",
            Self::table()
        );
        let items = sqlx::query_as::<_, R>(&sql)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    async fn count(&self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", Self::table());
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn get(&self, id: &str) -> Result<R> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", Self::table());
        sqlx::query_as::<_, R>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found(R::KIND.entity_name(), id))
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?", Self::table());
        let row: Option<(i64,)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<R>> {
        let sql = format!("SELECT * FROM {} WHERE hash = ?", Self::table());
        let item = sqlx::query_as::<_, R>(&sql)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }
}
