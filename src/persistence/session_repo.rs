//! Session repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqliteConnection;

use crate::models::session::{Session, SessionStatus};
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_opt_ts, parse_ts};

/// Repository wrapper around `SQLite` for session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    session_name: String,
    phone: String,
    auth_blob: Vec<u8>,
    worker_id: Option<String>,
    status: String,
    msg_count: i64,
    last_activity: Option<String>,
    created_at: String,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        let status = SessionStatus::parse(&self.status)
            .ok_or_else(|| AppError::Db(format!("invalid session status: {}", self.status)))?;
        Ok(Session {
            id: self.id,
            user_id: self.user_id,
            session_name: self.session_name,
            phone: self.phone,
            auth_blob: self.auth_blob,
            worker_id: self.worker_id,
            status,
            msg_count: self.msg_count,
            last_activity: parse_opt_ts(self.last_activity.as_deref(), "last_activity")?,
            created_at: parse_ts(&self.created_at, "created_at")?,
        })
    }
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT INTO session (id, user_id, session_name, phone, auth_blob, worker_id,
             status, msg_count, last_activity, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.session_name)
        .bind(&session.phone)
        .bind(&session.auth_blob)
        .bind(&session.worker_id)
        .bind(session.status.as_str())
        .bind(session.msg_count)
        .bind(session.last_activity.map(|dt| dt.to_rfc3339()))
        .bind(session.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Retrieve a session by identifier. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM session WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(SessionRow::into_session).transpose()
    }

    /// Retrieve a session by identifier inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM session WHERE id = ?1")
            .bind(id)
            .fetch_optional(conn)
            .await?;
        row.map(SessionRow::into_session).transpose()
    }

    /// List sessions owned by a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> =
            sqlx::query_as("SELECT * FROM session WHERE user_id = ?1 ORDER BY created_at DESC")
                .bind(user_id)
                .fetch_all(self.db.as_ref())
                .await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// List all sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_all(&self) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> =
            sqlx::query_as("SELECT * FROM session ORDER BY created_at DESC")
                .fetch_all(self.db.as_ref())
                .await?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Update session status, validating the lifecycle transition.
    ///
    /// Returns the updated session entity.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist,
    /// `AppError::Conflict` if the transition is invalid, `AppError::Db`
    /// on other failures.
    pub async fn update_status(&self, id: &str, status: SessionStatus) -> Result<Session> {
        let current = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;

        if !current.can_transition_to(status) {
            return Err(AppError::Conflict(format!(
                "invalid session transition: {} -> {}",
                current.status.as_str(),
                status.as_str()
            )));
        }

        sqlx::query("UPDATE session SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found after update")))
    }

    /// Update session status inside an open transaction, validating
    /// the lifecycle transition.
    ///
    /// Returns the updated session entity.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist,
    /// `AppError::Conflict` if the transition is invalid, `AppError::Db`
    /// on other failures.
    pub async fn update_status_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        status: SessionStatus,
    ) -> Result<Session> {
        let current = self
            .get_by_id_tx(&mut *conn, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;

        if !current.can_transition_to(status) {
            return Err(AppError::Conflict(format!(
                "invalid session transition: {} -> {}",
                current.status.as_str(),
                status.as_str()
            )));
        }

        sqlx::query("UPDATE session SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id)
            .execute(&mut *conn)
            .await?;

        self.get_by_id_tx(conn, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found after update")))
    }

    /// Set the executing worker and status inside an open transaction.
    ///
    /// Passing `worker_id = None` detaches the session from its worker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_worker_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        worker_id: Option<&str>,
        status: SessionStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE session SET worker_id = ?1, status = ?2 WHERE id = ?3")
            .bind(worker_id)
            .bind(status.as_str())
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Bump the processed-message counter and activity stamp.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn record_activity(&self, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE session SET msg_count = msg_count + 1, last_activity = ?1 WHERE id = ?2")
            .bind(&now)
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Delete a session row inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_tx(&self, conn: &mut SqliteConnection, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM session WHERE id = ?1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Delete all sessions owned by a user inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_by_user_tx(&self, conn: &mut SqliteConnection, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM session WHERE user_id = ?1")
            .bind(user_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Count a user's sessions in quota-consuming statuses.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_consuming_by_user(&self, user_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM session
             WHERE user_id = ?1 AND status IN ('active', 'paused', 'crashed')",
        )
        .bind(user_id)
        .fetch_one(self.db.as_ref())
        .await?;
        Ok(count)
    }

    /// Count sessions per status across all users.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_by_status(&self, status: SessionStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM session WHERE status = ?1")
            .bind(status.as_str())
            .fetch_one(self.db.as_ref())
            .await?;
        Ok(count)
    }
}
