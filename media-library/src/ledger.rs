//! Dense ordering for a media collection.
//!
//! Every collection holds positions `0..N-1` with no gaps and no duplicates.
//! The `position` column is UNIQUE and SQLite checks it row by row, so any
//! move that crosses occupied slots parks the moving row at a negative
//! position first and shifts neighbours in the order that never collides.
//!
//! All multi-step operations take the collection lock and run inside a
//! `BEGIN IMMEDIATE` transaction; a failure at any step rolls the whole
//! operation back.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::database::models::MediaRecord;
use crate::database::repositories::{
    MediaRepository, MediaTxOps, ShiftOrder, SqlxMediaRepository,
};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::{DbPool, ImmediateTransaction, begin_immediate};
use crate::{Error, Result};

/// Parking slot for a single row while its neighbours shift.
const STAGING_POSITION: i64 = -1;

/// One element of a bulk replace payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "P: serde::de::DeserializeOwned"))]
pub struct ReplaceEntry<P> {
    pub id: String,
    pub position: i64,
    #[serde(flatten)]
    pub fields: P,
}

impl<P: Default> ReplaceEntry<P> {
    pub fn reorder(id: impl Into<String>, position: i64) -> Self {
        Self {
            id: id.into(),
            position,
            fields: P::default(),
        }
    }
}

/// Position bookkeeping for the collection of `R`.
pub struct PositionLedger<R: MediaRecord> {
    pool: DbPool,
    repository: SqlxMediaRepository<R>,
    lock: Mutex<()>,
    retry_limit: usize,
}

impl<R: MediaRecord> PositionLedger<R> {
    pub fn new(pool: DbPool, retry_limit: usize) -> Self {
        Self {
            repository: SqlxMediaRepository::new(pool.clone()),
            pool,
            lock: Mutex::new(()),
            retry_limit: retry_limit.max(1),
        }
    }

    fn collection() -> &'static str {
        R::KIND.table()
    }

    /// Read access; reads never take the collection lock.
    pub fn repository(&self) -> &SqlxMediaRepository<R> {
        &self.repository
    }

    async fn begin(&self) -> Result<ImmediateTransaction> {
        retry_on_sqlite_busy("begin_immediate", || async {
            begin_immediate(&self.pool).await.map_err(Error::from)
        })
        .await
    }

    /// Commit on success, roll back on failure.
    async fn finish<T>(tx: ImmediateTransaction, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        collection = Self::collection(),
                        error = %rollback_err,
                        "Rollback failed; connection will be discarded"
                    );
                }
                Err(e)
            }
        }
    }

    /// Insert `record` at the tail (`at = None`) or at `at`, shifting
    /// everything at or after it up by one.
    ///
    /// A UNIQUE violation on `position` means another writer took the slot
    /// between the read and the insert; the whole step is retried up to the
    /// configured limit. A violation on `hash` is a duplicate upload.
    #[instrument(skip(self, record), fields(collection = Self::collection(), id = record.id()))]
    pub async fn insert(&self, mut record: R, at: Option<i64>) -> Result<R> {
        let _guard = self.lock.lock().await;

        for attempt in 1..=self.retry_limit {
            let mut tx = self.begin().await?;
            let result = Self::insert_in(&mut tx, &mut record, at).await;
            match Self::finish(tx, result).await {
                Ok(()) => {
                    debug!(position = record.position(), attempt, "Inserted");
                    return Ok(record);
                }
                Err(e) if e.is_unique_violation_on(Self::collection(), "position") => {
                    warn!(attempt, "Position already taken, retrying");
                }
                Err(e) if e.is_unique_violation_on(Self::collection(), "hash") => {
                    return Err(Error::conflict(format!(
                        "{} with identical content already exists",
                        R::KIND.entity_name()
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::TransientConflict {
            collection: Self::collection(),
            attempts: self.retry_limit,
        })
    }

    async fn insert_in(tx: &mut ImmediateTransaction, record: &mut R, at: Option<i64>) -> Result<()> {
        let count = MediaTxOps::<R>::count(tx).await?;
        let position = match at {
            None => count,
            Some(p) if (0..=count).contains(&p) => {
                MediaTxOps::<R>::shift_range(tx, p, None, 1, ShiftOrder::Descending).await?;
                p
            }
            Some(p) => {
                return Err(Error::invalid(format!(
                    "insert position {p} outside 0..={count}"
                )));
            }
        };
        record.set_position(position);
        MediaTxOps::<R>::insert(tx, record).await
    }

    /// Exchange the positions of two items.
    #[instrument(skip(self), fields(collection = Self::collection()))]
    pub async fn swap(&self, id_a: &str, id_b: &str) -> Result<(R, R)> {
        let _guard = self.lock.lock().await;
        let mut tx = self.begin().await?;
        let result = Self::swap_in(&mut tx, id_a, id_b).await;
        Self::finish(tx, result).await
    }

    async fn swap_in(tx: &mut ImmediateTransaction, id_a: &str, id_b: &str) -> Result<(R, R)> {
        let pos_a = MediaTxOps::<R>::position_of(tx, id_a).await?;
        let pos_b = MediaTxOps::<R>::position_of(tx, id_b).await?;

        if id_a != id_b {
            MediaTxOps::<R>::set_position(tx, id_a, STAGING_POSITION).await?;
            MediaTxOps::<R>::set_position(tx, id_b, pos_a).await?;
            MediaTxOps::<R>::set_position(tx, id_a, pos_b).await?;
        }

        let a = MediaTxOps::<R>::get(tx, id_a).await?;
        let b = MediaTxOps::<R>::get(tx, id_b).await?;
        Ok((a, b))
    }

    /// Move one item to `new_position`, shifting the items in between by one
    /// towards the vacated slot.
    #[instrument(skip(self), fields(collection = Self::collection()))]
    pub async fn relocate(&self, id: &str, new_position: i64) -> Result<R> {
        let _guard = self.lock.lock().await;
        let mut tx = self.begin().await?;
        let result = Self::relocate_in(&mut tx, id, new_position).await;
        Self::finish(tx, result).await
    }

    async fn relocate_in(tx: &mut ImmediateTransaction, id: &str, new_position: i64) -> Result<R> {
        let count = MediaTxOps::<R>::count(tx).await?;
        let old_position = MediaTxOps::<R>::position_of(tx, id).await?;
        if !(0..count).contains(&new_position) {
            return Err(Error::invalid(format!(
                "position {new_position} outside 0..{count}"
            )));
        }
        if old_position == new_position {
            return MediaTxOps::<R>::get(tx, id).await;
        }

        MediaTxOps::<R>::set_position(tx, id, STAGING_POSITION).await?;
        if old_position < new_position {
            MediaTxOps::<R>::shift_range(
                tx,
                old_position + 1,
                Some(new_position),
                -1,
                ShiftOrder::Ascending,
            )
            .await?;
        } else {
            MediaTxOps::<R>::shift_range(
                tx,
                new_position,
                Some(old_position - 1),
                1,
                ShiftOrder::Descending,
            )
            .await?;
        }
        MediaTxOps::<R>::set_position(tx, id, new_position).await?;

        MediaTxOps::<R>::get(tx, id).await
    }

    /// Delete an item and close the gap it leaves.
    ///
    /// Returns the removed record so the caller can release its files.
    #[instrument(skip(self), fields(collection = Self::collection()))]
    pub async fn remove_and_compact(&self, id: &str) -> Result<R> {
        let _guard = self.lock.lock().await;
        let mut tx = self.begin().await?;
        let result = Self::remove_in(&mut tx, id).await;
        Self::finish(tx, result).await
    }

    async fn remove_in(tx: &mut ImmediateTransaction, id: &str) -> Result<R> {
        let record = MediaTxOps::<R>::get(tx, id).await?;
        MediaTxOps::<R>::delete(tx, id).await?;
        let moved = MediaTxOps::<R>::shift_range(
            tx,
            record.position() + 1,
            None,
            -1,
            ShiftOrder::Ascending,
        )
        .await?;
        debug!(id, moved, "Compacted after removal");
        Ok(record)
    }

    /// Rewrite the whole ordering (and per-kind fields) in one transaction.
    ///
    /// The payload must name every current item exactly once and its
    /// positions must be exactly `0..N-1`. Nothing is written unless the
    /// payload passes those checks; any later failure rolls back.
    #[instrument(skip(self, entries), fields(collection = Self::collection(), entries = entries.len()))]
    pub async fn bulk_replace(&self, entries: Vec<ReplaceEntry<R::Patch>>) -> Result<Vec<R>> {
        let _guard = self.lock.lock().await;
        let mut tx = self.begin().await?;
        let result = Self::bulk_replace_in(&mut tx, &entries)
            .await
            .map_err(|e| Error::transaction(Self::collection(), e));
        Self::finish(tx, result).await?;

        self.repository.get_all().await
    }

    async fn bulk_replace_in(
        tx: &mut ImmediateTransaction,
        entries: &[ReplaceEntry<R::Patch>],
    ) -> Result<()> {
        let current = MediaTxOps::<R>::positions(tx).await?;
        validate_replacement(&current, entries)?;

        let old_positions: HashMap<&str, i64> =
            current.iter().map(|(id, p)| (id.as_str(), *p)).collect();

        // Pass 1: park every row at a distinct negative slot.
        for entry in entries {
            let old = old_positions
                .get(entry.id.as_str())
                .copied()
                .ok_or_else(|| Error::not_found(R::KIND.entity_name(), entry.id.clone()))?;
            MediaTxOps::<R>::set_position(tx, &entry.id, -(old + 1)).await?;
        }

        // Pass 2: final positions; no two entries share one, so no collisions.
        for entry in entries {
            MediaTxOps::<R>::set_position(tx, &entry.id, entry.position).await?;
            MediaTxOps::<R>::apply_patch(tx, &entry.id, &entry.fields).await?;
        }
        Ok(())
    }

    /// Check that stored positions are exactly `0..N-1`.
    pub async fn audit(&self) -> Result<()> {
        let sql = format!(
            "SELECT position FROM {} ORDER BY position ASC",
            Self::collection()
        );
        let positions: Vec<(i64,)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        for (expected, (actual,)) in positions.iter().enumerate() {
            if *actual != expected as i64 {
                return Err(Error::Integrity {
                    collection: Self::collection(),
                    detail: format!("expected position {expected}, found {actual}"),
                });
            }
        }
        Ok(())
    }
}

/// Reject a bulk replace payload that is not a permutation of the
/// collection onto `0..N-1`.
fn validate_replacement<P>(current: &[(String, i64)], entries: &[ReplaceEntry<P>]) -> Result<()> {
    if entries.len() != current.len() {
        return Err(Error::invalid(format!(
            "replace payload has {} entries but the collection holds {}",
            entries.len(),
            current.len()
        )));
    }

    let known: HashSet<&str> = current.iter().map(|(id, _)| id.as_str()).collect();
    let mut seen_ids = HashSet::with_capacity(entries.len());
    let mut seen_positions = HashSet::with_capacity(entries.len());
    let n = entries.len() as i64;

    for entry in entries {
        if !known.contains(entry.id.as_str()) {
            return Err(Error::invalid(format!("unknown id {}", entry.id)));
        }
        if !seen_ids.insert(entry.id.as_str()) {
            return Err(Error::invalid(format!("id {} listed twice", entry.id)));
        }
        if !(0..n).contains(&entry.position) {
            return Err(Error::invalid(format!(
                "position {} outside 0..{n}",
                entry.position
            )));
        }
        if !seen_positions.insert(entry.position) {
            return Err(Error::invalid(format!(
                "position {} assigned twice",
                entry.position
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current(n: i64) -> Vec<(String, i64)> {
        (0..n).map(|i| (format!("id{i}"), i)).collect()
    }

    fn entry(id: &str, position: i64) -> ReplaceEntry<()> {
        ReplaceEntry {
            id: id.to_string(),
            position,
            fields: (),
        }
    }

    #[test]
    fn permutation_is_accepted() {
        let entries = vec![entry("id2", 0), entry("id0", 1), entry("id1", 2)];
        validate_replacement(&current(3), &entries).unwrap();
    }

    #[test]
    fn short_payload_is_rejected() {
        let entries = vec![entry("id0", 0), entry("id1", 1)];
        let err = validate_replacement(&current(3), &entries).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }

    #[test]
    fn duplicate_position_is_rejected() {
        let entries = vec![entry("id0", 0), entry("id1", 0), entry("id2", 2)];
        assert!(validate_replacement(&current(3), &entries).is_err());
    }

    #[test]
    fn duplicate_or_unknown_id_is_rejected() {
        let entries = vec![entry("id0", 0), entry("id0", 1), entry("id2", 2)];
        assert!(validate_replacement(&current(3), &entries).is_err());

        let entries = vec![entry("id0", 0), entry("zz", 1), entry("id2", 2)];
        assert!(validate_replacement(&current(3), &entries).is_err());
    }

    #[test]
    fn gap_is_rejected() {
        let entries = vec![entry("id0", 0), entry("id1", 1), entry("id2", 5)];
        assert!(validate_replacement(&current(3), &entries).is_err());
    }

    #[test]
    fn replace_entry_flattens_fields() {
        let json = r#"{"id":"v1","position":2,"line1":"a"}"#;
        let entry: ReplaceEntry<crate::database::models::VideoPatch> =
            serde_json::from_str(json).unwrap();
        assert_eq!(entry.position, 2);
        assert_eq!(entry.fields.line1.as_deref(), Some("a"));
        assert_eq!(entry.fields.url, None);
    }
}
