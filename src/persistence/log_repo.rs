//! Forwarding-log repository: append-only pipeline outcome records.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::event::MessageKind;
use crate::models::log::{ForwardingLog, LogStatus};
use crate::{AppError, Result};

use super::db::Database;
use super::parse_ts;

/// Repository wrapper around `SQLite` for forwarding logs.
#[derive(Clone)]
pub struct LogRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct LogRow {
    id: String,
    mapping_id: Option<String>,
    source_id: Option<String>,
    destination_id: Option<String>,
    msg_type: String,
    original_text: Option<String>,
    processed_text: Option<String>,
    status: String,
    filter_reason: Option<String>,
    error: Option<String>,
    processing_ms: Option<i64>,
    created_at: String,
}

impl LogRow {
    fn into_log(self) -> Result<ForwardingLog> {
        let msg_type = MessageKind::parse(&self.msg_type)
            .ok_or_else(|| AppError::Db(format!("invalid msg_type: {}", self.msg_type)))?;
        let status = LogStatus::parse(&self.status)
            .ok_or_else(|| AppError::Db(format!("invalid log status: {}", self.status)))?;
        Ok(ForwardingLog {
            created_at: parse_ts(&self.created_at, "created_at")?,
            id: self.id,
            mapping_id: self.mapping_id,
            source_id: self.source_id,
            destination_id: self.destination_id,
            msg_type,
            original_text: self.original_text,
            processed_text: self.processed_text,
            status,
            filter_reason: self.filter_reason,
            error: self.error,
            processing_ms: self.processing_ms,
        })
    }
}

impl LogRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append a log record. Failures here must never fail the pipeline,
    /// so callers typically log and swallow the error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn insert(&self, log: &ForwardingLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO forwarding_log (id, mapping_id, source_id, destination_id, msg_type,
             original_text, processed_text, status, filter_reason, error, processing_ms,
             created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(&log.id)
        .bind(&log.mapping_id)
        .bind(&log.source_id)
        .bind(&log.destination_id)
        .bind(log.msg_type.as_str())
        .bind(&log.original_text)
        .bind(&log.processed_text)
        .bind(log.status.as_str())
        .bind(&log.filter_reason)
        .bind(&log.error)
        .bind(log.processing_ms)
        .bind(log.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// List logs newest first, optionally filtered by status, with
    /// offset/limit paging.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(
        &self,
        status: Option<LogStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ForwardingLog>> {
        let rows: Vec<LogRow> = if let Some(status) = status {
            sqlx::query_as(
                "SELECT * FROM forwarding_log WHERE status = ?1
                 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
            )
            .bind(status.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(self.db.as_ref())
            .await?
        } else {
            sqlx::query_as(
                "SELECT * FROM forwarding_log ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(self.db.as_ref())
            .await?
        };
        rows.into_iter().map(LogRow::into_log).collect()
    }

    /// Count records per status since `since` (pass `None` for all time).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_since(
        &self,
        status: LogStatus,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let count: i64 = if let Some(since) = since {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM forwarding_log WHERE status = ?1 AND created_at >= ?2",
            )
            .bind(status.as_str())
            .bind(since.to_rfc3339())
            .fetch_one(self.db.as_ref())
            .await?
        } else {
            sqlx::query_scalar("SELECT COUNT(*) FROM forwarding_log WHERE status = ?1")
                .bind(status.as_str())
                .fetch_one(self.db.as_ref())
                .await?
        };
        Ok(count)
    }

    /// Purge records created before `cutoff`. Returns rows removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM forwarding_log WHERE created_at < ?1")
            .bind(cutoff.to_rfc3339())
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected())
    }
}
