//! Session-assignment repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqliteConnection;

use crate::models::assignment::{AssignmentStatus, AssignmentType, SessionAssignment};
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_opt_ts, parse_ts};

/// Repository wrapper around `SQLite` for assignment records.
#[derive(Clone)]
pub struct AssignmentRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct AssignmentRow {
    id: String,
    session_id: String,
    worker_id: String,
    user_id: String,
    kind: String,
    status: String,
    priority: i64,
    messages_processed: i64,
    ram_mb: i64,
    avg_proc_ms: i64,
    assigned_at: String,
    activated_at: Option<String>,
    last_heartbeat: Option<String>,
    last_migration: Option<String>,
}

impl AssignmentRow {
    fn into_assignment(self) -> Result<SessionAssignment> {
        let kind = AssignmentType::parse(&self.kind)
            .ok_or_else(|| AppError::Db(format!("invalid assignment kind: {}", self.kind)))?;
        let status = AssignmentStatus::parse(&self.status)
            .ok_or_else(|| AppError::Db(format!("invalid assignment status: {}", self.status)))?;
        Ok(SessionAssignment {
            id: self.id,
            session_id: self.session_id,
            worker_id: self.worker_id,
            user_id: self.user_id,
            kind,
            status,
            priority: u8::try_from(self.priority.clamp(1, 5)).unwrap_or(1),
            messages_processed: self.messages_processed,
            ram_mb: self.ram_mb,
            avg_proc_ms: self.avg_proc_ms,
            assigned_at: parse_ts(&self.assigned_at, "assigned_at")?,
            activated_at: parse_opt_ts(self.activated_at.as_deref(), "activated_at")?,
            last_heartbeat: parse_opt_ts(self.last_heartbeat.as_deref(), "last_heartbeat")?,
            last_migration: parse_opt_ts(self.last_migration.as_deref(), "last_migration")?,
        })
    }
}

impl AssignmentRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert an assignment inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create_tx(
        &self,
        conn: &mut SqliteConnection,
        assignment: &SessionAssignment,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO session_assignment (id, session_id, worker_id, user_id, kind, status,
             priority, messages_processed, ram_mb, avg_proc_ms, assigned_at, activated_at,
             last_heartbeat, last_migration)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )
        .bind(&assignment.id)
        .bind(&assignment.session_id)
        .bind(&assignment.worker_id)
        .bind(&assignment.user_id)
        .bind(assignment.kind.as_str())
        .bind(assignment.status.as_str())
        .bind(i64::from(assignment.priority))
        .bind(assignment.messages_processed)
        .bind(assignment.ram_mb)
        .bind(assignment.avg_proc_ms)
        .bind(assignment.assigned_at.to_rfc3339())
        .bind(assignment.activated_at.map(|dt| dt.to_rfc3339()))
        .bind(assignment.last_heartbeat.map(|dt| dt.to_rfc3339()))
        .bind(assignment.last_migration.map(|dt| dt.to_rfc3339()))
        .execute(conn)
        .await?;
        Ok(())
    }

    /// The live (non-terminated) assignment for a session, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_live_by_session(&self, session_id: &str) -> Result<Option<SessionAssignment>> {
        let row: Option<AssignmentRow> = sqlx::query_as(
            "SELECT * FROM session_assignment WHERE session_id = ?1 AND status != 'terminated'",
        )
        .bind(session_id)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(AssignmentRow::into_assignment).transpose()
    }

    /// Same as [`get_live_by_session`](Self::get_live_by_session) inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_live_by_session_tx(
        &self,
        conn: &mut SqliteConnection,
        session_id: &str,
    ) -> Result<Option<SessionAssignment>> {
        let row: Option<AssignmentRow> = sqlx::query_as(
            "SELECT * FROM session_assignment WHERE session_id = ?1 AND status != 'terminated'",
        )
        .bind(session_id)
        .fetch_optional(conn)
        .await?;
        row.map(AssignmentRow::into_assignment).transpose()
    }

    /// Live assignments currently placed on a worker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_live_by_worker(&self, worker_id: &str) -> Result<Vec<SessionAssignment>> {
        let rows: Vec<AssignmentRow> = sqlx::query_as(
            "SELECT * FROM session_assignment WHERE worker_id = ?1 AND status != 'terminated'
             ORDER BY assigned_at ASC",
        )
        .bind(worker_id)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(AssignmentRow::into_assignment).collect()
    }

    /// Write an assignment status inside an open transaction.
    ///
    /// Transition validity is the caller's concern, checked against
    /// [`SessionAssignment::can_transition_to`] before calling.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_status_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        status: AssignmentStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE session_assignment SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Mark an assignment migrating inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_migrating_tx(&self, conn: &mut SqliteConnection, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE session_assignment SET status = 'migrating', last_migration = ?1 WHERE id = ?2",
        )
        .bind(&now)
        .bind(id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Rewrite the worker binding after a successful migration placement.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn rebind_worker_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        worker_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE session_assignment SET worker_id = ?1, status = 'assigned', activated_at = NULL
             WHERE id = ?2",
        )
        .bind(worker_id)
        .bind(id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Terminate an assignment inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn terminate_tx(&self, conn: &mut SqliteConnection, id: &str) -> Result<()> {
        sqlx::query("UPDATE session_assignment SET status = 'terminated' WHERE id = ?1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Assignments whose worker has not been told to start the session
    /// yet (freshly assigned or rebound by migration).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_awaiting_start(&self) -> Result<Vec<SessionAssignment>> {
        let rows: Vec<AssignmentRow> = sqlx::query_as(
            "SELECT * FROM session_assignment WHERE status = 'assigned' AND activated_at IS NULL
             ORDER BY assigned_at ASC",
        )
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(AssignmentRow::into_assignment).collect()
    }

    /// Record the worker's start acknowledgement; the first heartbeat
    /// then flips the assignment active.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_started(&self, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE session_assignment SET activated_at = ?1
             WHERE id = ?2 AND activated_at IS NULL",
        )
        .bind(&now)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Record worker acknowledgement: first heartbeat activates.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn record_heartbeat(&self, id: &str, ram_mb: i64, avg_proc_ms: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE session_assignment SET status = CASE WHEN status = 'assigned' THEN 'active'
             ELSE status END,
             activated_at = COALESCE(activated_at, ?1), last_heartbeat = ?1,
             ram_mb = ?2, avg_proc_ms = ?3
             WHERE id = ?4",
        )
        .bind(&now)
        .bind(ram_mb)
        .bind(avg_proc_ms)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Bump the processed-message counter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn record_message(&self, session_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE session_assignment SET messages_processed = messages_processed + 1
             WHERE session_id = ?1 AND status != 'terminated'",
        )
        .bind(session_id)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }
}
