//! Pending-message repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::pending::{PendingMessage, PendingStatus};
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_opt_ts, parse_ts};

/// Repository wrapper around `SQLite` for held messages.
#[derive(Clone)]
pub struct PendingRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct PendingRow {
    id: String,
    mapping_id: String,
    user_id: String,
    source_chat_id: i64,
    source_msg_id: i64,
    original_content: String,
    processed_content: Option<String>,
    status: String,
    scheduled_for: String,
    expires_at: Option<String>,
    approved_by: Option<String>,
    approved_at: Option<String>,
    created_at: String,
}

impl PendingRow {
    fn into_pending(self) -> Result<PendingMessage> {
        let status = PendingStatus::parse(&self.status)
            .ok_or_else(|| AppError::Db(format!("invalid pending status: {}", self.status)))?;
        Ok(PendingMessage {
            scheduled_for: parse_ts(&self.scheduled_for, "scheduled_for")?,
            expires_at: parse_opt_ts(self.expires_at.as_deref(), "expires_at")?,
            approved_at: parse_opt_ts(self.approved_at.as_deref(), "approved_at")?,
            created_at: parse_ts(&self.created_at, "created_at")?,
            id: self.id,
            mapping_id: self.mapping_id,
            user_id: self.user_id,
            source_chat_id: self.source_chat_id,
            source_msg_id: self.source_msg_id,
            original_content: self.original_content,
            processed_content: self.processed_content,
            status,
            approved_by: self.approved_by,
        })
    }
}

impl PendingRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a held message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, pending: &PendingMessage) -> Result<()> {
        sqlx::query(
            "INSERT INTO pending_message (id, mapping_id, user_id, source_chat_id, source_msg_id,
             original_content, processed_content, status, scheduled_for, expires_at, approved_by,
             approved_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(&pending.id)
        .bind(&pending.mapping_id)
        .bind(&pending.user_id)
        .bind(pending.source_chat_id)
        .bind(pending.source_msg_id)
        .bind(&pending.original_content)
        .bind(&pending.processed_content)
        .bind(pending.status.as_str())
        .bind(pending.scheduled_for.to_rfc3339())
        .bind(pending.expires_at.map(|dt| dt.to_rfc3339()))
        .bind(&pending.approved_by)
        .bind(pending.approved_at.map(|dt| dt.to_rfc3339()))
        .bind(pending.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Retrieve by identifier. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<PendingMessage>> {
        let row: Option<PendingRow> = sqlx::query_as("SELECT * FROM pending_message WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(PendingRow::into_pending).transpose()
    }

    /// List a user's held messages, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<PendingMessage>> {
        let rows: Vec<PendingRow> = sqlx::query_as(
            "SELECT * FROM pending_message WHERE user_id = ?1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(PendingRow::into_pending).collect()
    }

    /// Record an operator decision on a `pending` row.
    ///
    /// The `status = 'pending'` guard makes decisions race-safe: a
    /// second decision (or a decision after auto-approval) affects zero
    /// rows and surfaces as `Conflict`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the row is no longer pending,
    /// `AppError::Db` on other failures.
    pub async fn decide(&self, id: &str, approve: bool, operator: &str) -> Result<()> {
        let status = if approve {
            PendingStatus::Approved
        } else {
            PendingStatus::Rejected
        };
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE pending_message SET status = ?1, approved_by = ?2, approved_at = ?3
             WHERE id = ?4 AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(operator)
        .bind(&now)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "pending message {id} already decided or missing"
            )));
        }
        Ok(())
    }

    /// Auto-approve every pending row past its `expires_at` deadline.
    /// Returns the number of rows promoted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn auto_approve_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let stamp = now.to_rfc3339();
        let result = sqlx::query(
            "UPDATE pending_message SET status = 'approved', approved_at = ?1
             WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at <= ?1",
        )
        .bind(&stamp)
        .execute(self.db.as_ref())
        .await?;
        Ok(result.rows_affected())
    }

    /// Approved rows whose dispatch instant has arrived, atomically
    /// flipped to `scheduled` so a second poll never double-claims.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<PendingMessage>> {
        let stamp = now.to_rfc3339();
        let rows: Vec<PendingRow> = sqlx::query_as(
            "UPDATE pending_message SET status = 'scheduled'
             WHERE status = 'approved' AND scheduled_for <= ?1
             RETURNING *",
        )
        .bind(&stamp)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(PendingRow::into_pending).collect()
    }

    /// Terminal status updates from the dispatch path (`sent`,
    /// `expired`, or back to `approved` after a transient failure).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_status(&self, id: &str, status: PendingStatus) -> Result<()> {
        sqlx::query("UPDATE pending_message SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Delete all held messages owned by a user inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_by_user_tx(
        &self,
        conn: &mut sqlx::SqliteConnection,
        user_id: &str,
    ) -> Result<()> {
        sqlx::query("DELETE FROM pending_message WHERE user_id = ?1")
            .bind(user_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Expire pending/approved rows whose mapping no longer exists or
    /// was deactivated. Returns the number of rows expired.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn expire_orphaned(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE pending_message SET status = 'expired'
             WHERE status IN ('pending', 'approved')
             AND mapping_id NOT IN (SELECT id FROM mapping WHERE active = 1)",
        )
        .execute(self.db.as_ref())
        .await?;
        Ok(result.rows_affected())
    }
}
