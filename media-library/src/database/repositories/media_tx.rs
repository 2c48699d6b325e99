//! Transactional operations for media collections.
//!
//! These methods operate within an existing transaction and do NOT commit.
//! The caller is responsible for committing or rolling back the transaction.

use std::marker::PhantomData;

use sqlx::SqliteConnection;

use crate::database::models::MediaRecord;
use crate::database::time::now_ms;
use crate::{Error, Result};

/// Transactional statements for the collection of `R`.
pub struct MediaTxOps<R>(PhantomData<fn() -> R>);

/// Iteration order for a batch of position rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOrder {
    Ascending,
    Descending,
}

impl ShiftOrder {
    fn sql(&self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

impl<R: MediaRecord> MediaTxOps<R> {
    fn table() -> &'static str {
        R::KIND.table()
    }

    pub async fn count(tx: &mut SqliteConnection) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", Self::table());
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&mut *tx).await?;
        Ok(count)
    }

    pub async fn get(tx: &mut SqliteConnection, id: &str) -> Result<R> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", Self::table());
        sqlx::query_as::<_, R>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::not_found(R::KIND.entity_name(), id))
    }

    pub async fn position_of(tx: &mut SqliteConnection, id: &str) -> Result<i64> {
        let sql = format!("SELECT position FROM {} WHERE id = ?", Self::table());
        let row: Option<(i64,)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        row.map(|(p,)| p)
            .ok_or_else(|| Error::not_found(R::KIND.entity_name(), id))
    }

    /// `(id, position)` pairs for the whole collection, ascending.
    pub async fn positions(tx: &mut SqliteConnection) -> Result<Vec<(String, i64)>> {
        let sql = format!(
            "SELECT id, position FROM {} ORDER BY position ASC",
            Self::table()
        );
        let rows: Vec<(String, i64)> = sqlx::query_as(&sql).fetch_all(&mut *tx).await?;
        Ok(rows)
    }

    pub async fn set_position(tx: &mut SqliteConnection, id: &str, position: i64) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET position = ?, updated_at = ? WHERE id = ?",
            Self::table()
        );
        let result = sqlx::query(&sql)
            .bind(position)
            .bind(now_ms())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(R::KIND.entity_name(), id));
        }
        Ok(())
    }

    /// Add `delta` to every position in `start..=end`, one row at a time in
    /// `order`. Returns the number of rows moved.
    ///
    /// SQLite checks UNIQUE per row, so the order must walk away from the
    /// direction of travel: descending for `+1`, ascending for `-1`.
    pub async fn shift_range(
        tx: &mut SqliteConnection,
        start: i64,
        end: Option<i64>,
        delta: i64,
        order: ShiftOrder,
    ) -> Result<usize> {
        let sql = match end {
            Some(_) => format!(
                "SELECT id, position FROM {} WHERE position BETWEEN ? AND ? ORDER BY position {}",
                Self::table(),
                order.sql()
            ),
            None => format!(
                "SELECT id, position FROM {} WHERE position >= ? ORDER BY position {}",
                Self::table(),
                order.sql()
            ),
        };
        let mut query = sqlx::query_as::<_, (String, i64)>(&sql).bind(start);
        if let Some(end) = end {
            query = query.bind(end);
        }
        let rows = query.fetch_all(&mut *tx).await?;

        for (id, position) in &rows {
            Self::set_position(tx, id, position + delta).await?;
        }
        Ok(rows.len())
    }

    pub async fn insert(tx: &mut SqliteConnection, record: &R) -> Result<()> {
        record.bind_insert().execute(&mut *tx).await?;
        Ok(())
    }

    pub async fn delete(tx: &mut SqliteConnection, id: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?", Self::table());
        let result = sqlx::query(&sql).bind(id).execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(R::KIND.entity_name(), id));
        }
        Ok(())
    }

    pub async fn apply_patch(tx: &mut SqliteConnection, id: &str, patch: &R::Patch) -> Result<()> {
        let Some(sql) = R::PATCH_SQL else {
            return Ok(());
        };
        R::bind_patch(sqlx::query(sql), patch, id)
            .execute(&mut *tx)
            .await?;
        Ok(())
    }
}
