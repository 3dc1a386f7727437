//! Message-tracker repository — the at-most-once bookkeeping table.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::models::tracker::TrackerRow as Tracker;
use crate::Result;

use super::db::Database;
use super::{parse_opt_ts, parse_ts};

/// Repository wrapper around `SQLite` for tracker rows.
#[derive(Clone)]
pub struct TrackerRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct DbRow {
    id: String,
    mapping_id: String,
    source_msg_id: i64,
    source_chat_id: i64,
    forwarded_msg_id: Option<i64>,
    destination_chat_id: i64,
    hash: Option<String>,
    orphaned: i64,
    last_synced: Option<String>,
    created_at: String,
}

impl DbRow {
    fn into_tracker(self) -> Result<Tracker> {
        Ok(Tracker {
            last_synced: parse_opt_ts(self.last_synced.as_deref(), "last_synced")?,
            created_at: parse_ts(&self.created_at, "created_at")?,
            id: self.id,
            mapping_id: self.mapping_id,
            source_msg_id: self.source_msg_id,
            source_chat_id: self.source_chat_id,
            forwarded_msg_id: self.forwarded_msg_id,
            destination_chat_id: self.destination_chat_id,
            hash: self.hash,
            orphaned: self.orphaned != 0,
        })
    }
}

impl TrackerRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a tracker row.
    ///
    /// The table's unique key `(mapping_id, source_chat_id,
    /// source_msg_id)` makes this the duplicate-suppression point: a
    /// second insert for the same source message surfaces as
    /// `AppError::Conflict`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` for a duplicate key, `AppError::Db`
    /// on other failures.
    pub async fn insert(&self, row: &Tracker) -> Result<()> {
        sqlx::query(
            "INSERT INTO message_tracker (id, mapping_id, source_msg_id, source_chat_id,
             forwarded_msg_id, destination_chat_id, hash, orphaned, last_synced, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&row.id)
        .bind(&row.mapping_id)
        .bind(row.source_msg_id)
        .bind(row.source_chat_id)
        .bind(row.forwarded_msg_id)
        .bind(row.destination_chat_id)
        .bind(&row.hash)
        .bind(i64::from(row.orphaned))
        .bind(row.last_synced.map(|dt| dt.to_rfc3339()))
        .bind(row.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Retrieve by row identifier. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Tracker>> {
        let row: Option<DbRow> = sqlx::query_as("SELECT * FROM message_tracker WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(DbRow::into_tracker).transpose()
    }

    /// Retrieve by the natural key. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_key(
        &self,
        mapping_id: &str,
        source_chat_id: i64,
        source_msg_id: i64,
    ) -> Result<Option<Tracker>> {
        let row: Option<DbRow> = sqlx::query_as(
            "SELECT * FROM message_tracker
             WHERE mapping_id = ?1 AND source_chat_id = ?2 AND source_msg_id = ?3",
        )
        .bind(mapping_id)
        .bind(source_chat_id)
        .bind(source_msg_id)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(DbRow::into_tracker).transpose()
    }

    /// All tracker rows for one source message across sibling mappings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_source(
        &self,
        source_chat_id: i64,
        source_msg_id: i64,
    ) -> Result<Vec<Tracker>> {
        let rows: Vec<DbRow> = sqlx::query_as(
            "SELECT * FROM message_tracker WHERE source_chat_id = ?1 AND source_msg_id = ?2",
        )
        .bind(source_chat_id)
        .bind(source_msg_id)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(DbRow::into_tracker).collect()
    }

    /// Fill in the forwarded message id after a successful dispatch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_forwarded(
        &self,
        id: &str,
        forwarded_msg_id: i64,
        hash: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE message_tracker SET forwarded_msg_id = ?1, hash = ?2, last_synced = ?3
             WHERE id = ?4",
        )
        .bind(forwarded_msg_id)
        .bind(hash)
        .bind(&now)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Advance `last_synced` (and optionally the content hash) after an
    /// edit propagated.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_synced(&self, id: &str, hash: Option<&str>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE message_tracker SET last_synced = ?1, hash = COALESCE(?2, hash) WHERE id = ?3",
        )
        .bind(&now)
        .bind(hash)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Flag a row whose delete propagation exhausted its retries.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_orphaned(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE message_tracker SET orphaned = 1 WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Delete one tracker row (permanent dispatch failure or completed
    /// delete sync).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM message_tracker WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Delete all rows owned by a set of mappings inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_by_mapping_tx(
        &self,
        conn: &mut SqliteConnection,
        mapping_id: &str,
    ) -> Result<()> {
        sqlx::query("DELETE FROM message_tracker WHERE mapping_id = ?1")
            .bind(mapping_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Purge rows created before `cutoff`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM message_tracker WHERE created_at < ?1")
            .bind(cutoff.to_rfc3339())
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected())
    }
}
