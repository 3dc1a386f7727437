//! Assignment-queue repository for `SQLite` persistence.
//!
//! Position maintenance is transactional: any promotion or expiry is
//! followed by a dense renumbering inside the same transaction, keeping
//! positions a contiguous `[1..N]` ranking at every quiescent point.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::models::queue::{QueueItem, QueueStatus};
use crate::{AppError, Result};

use super::db::Database;
use super::parse_ts;

/// Repository wrapper around `SQLite` for queue items.
#[derive(Clone)]
pub struct QueueRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct QueueRow {
    id: String,
    user_id: String,
    session_id: String,
    priority: i64,
    position: i64,
    est_wait_s: i64,
    status: String,
    queued_at: String,
}

impl QueueRow {
    fn into_item(self) -> Result<QueueItem> {
        let status = QueueStatus::parse(&self.status)
            .ok_or_else(|| AppError::Db(format!("invalid queue status: {}", self.status)))?;
        Ok(QueueItem {
            id: self.id,
            user_id: self.user_id,
            session_id: self.session_id,
            priority: u8::try_from(self.priority.clamp(1, 5)).unwrap_or(1),
            position: self.position,
            est_wait_s: self.est_wait_s,
            status,
            queued_at: parse_ts(&self.queued_at, "queued_at")?,
        })
    }
}

impl QueueRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a queue item inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create_tx(&self, conn: &mut SqliteConnection, item: &QueueItem) -> Result<()> {
        sqlx::query(
            "INSERT INTO session_queue (id, user_id, session_id, priority, position, est_wait_s,
             status, queued_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&item.id)
        .bind(&item.user_id)
        .bind(&item.session_id)
        .bind(i64::from(item.priority))
        .bind(item.position)
        .bind(item.est_wait_s)
        .bind(item.status.as_str())
        .bind(item.queued_at.to_rfc3339())
        .execute(conn)
        .await?;
        Ok(())
    }

    /// The rank a new item of `priority` would take among queued items
    /// (1-based), inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn next_position_for_tx(
        &self,
        conn: &mut SqliteConnection,
        priority: u8,
    ) -> Result<i64> {
        let ahead: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM session_queue WHERE status = 'queued' AND priority >= ?1",
        )
        .bind(i64::from(priority))
        .fetch_one(conn)
        .await?;
        Ok(ahead + 1)
    }

    /// Queued items in promotion order `(priority desc, queued_at asc)`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_queued(&self) -> Result<Vec<QueueItem>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            "SELECT * FROM session_queue WHERE status = 'queued'
             ORDER BY priority DESC, queued_at ASC",
        )
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(QueueRow::into_item).collect()
    }

    /// Same as [`list_queued`](Self::list_queued) inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_queued_tx(&self, conn: &mut SqliteConnection) -> Result<Vec<QueueItem>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            "SELECT * FROM session_queue WHERE status = 'queued'
             ORDER BY priority DESC, queued_at ASC",
        )
        .fetch_all(conn)
        .await?;
        rows.into_iter().map(QueueRow::into_item).collect()
    }

    /// Count of queued items.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_queued(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM session_queue WHERE status = 'queued'")
                .fetch_one(self.db.as_ref())
                .await?;
        Ok(count)
    }

    /// The queued item for a session, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_queued_by_session(&self, session_id: &str) -> Result<Option<QueueItem>> {
        let row: Option<QueueRow> = sqlx::query_as(
            "SELECT * FROM session_queue WHERE session_id = ?1 AND status = 'queued'",
        )
        .bind(session_id)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(QueueRow::into_item).transpose()
    }

    /// Same as [`get_queued_by_session`](Self::get_queued_by_session)
    /// inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_queued_by_session_tx(
        &self,
        conn: &mut SqliteConnection,
        session_id: &str,
    ) -> Result<Option<QueueItem>> {
        let row: Option<QueueRow> = sqlx::query_as(
            "SELECT * FROM session_queue WHERE session_id = ?1 AND status = 'queued'",
        )
        .bind(session_id)
        .fetch_optional(conn)
        .await?;
        row.map(QueueRow::into_item).transpose()
    }

    /// Mark an item promoted inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_promoted_tx(&self, conn: &mut SqliteConnection, id: &str) -> Result<()> {
        sqlx::query("UPDATE session_queue SET status = 'promoted' WHERE id = ?1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Mark an item expired inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_expired_tx(&self, conn: &mut SqliteConnection, id: &str) -> Result<()> {
        sqlx::query("UPDATE session_queue SET status = 'expired' WHERE id = ?1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Queued items older than `cutoff`, candidates for expiry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn queued_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<QueueItem>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            "SELECT * FROM session_queue WHERE status = 'queued' AND queued_at < ?1",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(QueueRow::into_item).collect()
    }

    /// Renumber queued items densely by `(priority desc, queued_at asc)`
    /// and refresh every wait estimate, inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if any update fails.
    pub async fn renumber_tx(&self, conn: &mut SqliteConnection) -> Result<()> {
        let items = self.list_queued_tx(conn).await?;
        for (index, item) in items.iter().enumerate() {
            let position = i64::try_from(index).unwrap_or(i64::MAX - 1) + 1;
            sqlx::query("UPDATE session_queue SET position = ?1, est_wait_s = ?2 WHERE id = ?3")
                .bind(position)
                .bind(position * 300)
                .bind(&item.id)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}
