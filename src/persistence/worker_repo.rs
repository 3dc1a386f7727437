//! Worker repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::models::worker::{Worker, WorkerStatus};
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_opt_ts, parse_ts};

/// Repository wrapper around `SQLite` for worker records.
#[derive(Clone)]
pub struct WorkerRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct WorkerRow {
    id: String,
    worker_id: String,
    address: String,
    status: String,
    total_ram: i64,
    used_ram: i64,
    cpu_percent: f64,
    max_sessions: i64,
    active_sessions: i64,
    load_score: i64,
    ping_ms: i64,
    ram_threshold: i64,
    priority: i64,
    auth_token: String,
    last_heartbeat: Option<String>,
    created_at: String,
}

impl WorkerRow {
    fn into_worker(self) -> Result<Worker> {
        let status = WorkerStatus::parse(&self.status)
            .ok_or_else(|| AppError::Db(format!("invalid worker status: {}", self.status)))?;
        Ok(Worker {
            id: self.id,
            worker_id: self.worker_id,
            address: self.address,
            status,
            total_ram: self.total_ram,
            used_ram: self.used_ram,
            cpu_percent: self.cpu_percent,
            max_sessions: self.max_sessions,
            active_sessions: self.active_sessions,
            load_score: u8::try_from(self.load_score.clamp(0, 100)).unwrap_or(100),
            ping_ms: self.ping_ms,
            ram_threshold: self.ram_threshold,
            priority: self.priority,
            auth_token: self.auth_token,
            last_heartbeat: parse_opt_ts(self.last_heartbeat.as_deref(), "last_heartbeat")?,
            created_at: parse_ts(&self.created_at, "created_at")?,
        })
    }
}

impl WorkerRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new worker record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` on a duplicate worker label,
    /// `AppError::Db` on other failures.
    pub async fn create(&self, worker: &Worker) -> Result<()> {
        sqlx::query(
            "INSERT INTO worker (id, worker_id, address, status, total_ram, used_ram,
             cpu_percent, max_sessions, active_sessions, load_score, ping_ms, ram_threshold,
             priority, auth_token, last_heartbeat, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        )
        .bind(&worker.id)
        .bind(&worker.worker_id)
        .bind(&worker.address)
        .bind(worker.status.as_str())
        .bind(worker.total_ram)
        .bind(worker.used_ram)
        .bind(worker.cpu_percent)
        .bind(worker.max_sessions)
        .bind(worker.active_sessions)
        .bind(i64::from(worker.load_score))
        .bind(worker.ping_ms)
        .bind(worker.ram_threshold)
        .bind(worker.priority)
        .bind(&worker.auth_token)
        .bind(worker.last_heartbeat.map(|dt| dt.to_rfc3339()))
        .bind(worker.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Retrieve a worker by row identifier. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Worker>> {
        let row: Option<WorkerRow> = sqlx::query_as("SELECT * FROM worker WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(WorkerRow::into_worker).transpose()
    }

    /// Retrieve a worker by its human label. Returns `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_label(&self, label: &str) -> Result<Option<Worker>> {
        let row: Option<WorkerRow> = sqlx::query_as("SELECT * FROM worker WHERE worker_id = ?1")
            .bind(label)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(WorkerRow::into_worker).transpose()
    }

    /// List all workers.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<Worker>> {
        let rows: Vec<WorkerRow> = sqlx::query_as("SELECT * FROM worker ORDER BY worker_id")
            .fetch_all(self.db.as_ref())
            .await?;
        rows.into_iter().map(WorkerRow::into_worker).collect()
    }

    /// List workers in a given status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_status(&self, status: WorkerStatus) -> Result<Vec<Worker>> {
        let rows: Vec<WorkerRow> =
            sqlx::query_as("SELECT * FROM worker WHERE status = ?1 ORDER BY load_score ASC")
                .bind(status.as_str())
                .fetch_all(self.db.as_ref())
                .await?;
        rows.into_iter().map(WorkerRow::into_worker).collect()
    }

    /// List online workers inside an open transaction, least loaded first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_online_tx(&self, conn: &mut SqliteConnection) -> Result<Vec<Worker>> {
        let rows: Vec<WorkerRow> =
            sqlx::query_as("SELECT * FROM worker WHERE status = 'online' ORDER BY load_score ASC")
                .fetch_all(conn)
                .await?;
        rows.into_iter().map(WorkerRow::into_worker).collect()
    }

    /// Apply a heartbeat: metrics, load score, stamp, and online status
    /// (unless the worker is draining).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn apply_heartbeat(
        &self,
        id: &str,
        used_ram: i64,
        cpu_percent: f64,
        active_sessions: i64,
        ping_ms: i64,
        load_score: u8,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE worker SET used_ram = ?1, cpu_percent = ?2, active_sessions = ?3,
             ping_ms = ?4, load_score = ?5, last_heartbeat = ?6,
             status = CASE WHEN status = 'draining' THEN 'draining' ELSE 'online' END
             WHERE id = ?7",
        )
        .bind(used_ram)
        .bind(cpu_percent)
        .bind(active_sessions)
        .bind(ping_ms)
        .bind(i64::from(load_score))
        .bind(&now)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Set a worker's availability status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the worker does not exist,
    /// `AppError::Db` on other failures.
    pub async fn set_status(&self, id: &str, status: WorkerStatus) -> Result<()> {
        let result = sqlx::query("UPDATE worker SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("worker {id} not found")));
        }
        Ok(())
    }

    /// Adjust the active-session count inside an open transaction.
    ///
    /// `delta` is +1 on placement and -1 on release; the count never
    /// drops below zero.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn adjust_active_sessions_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        delta: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE worker SET active_sessions = MAX(active_sessions + ?1, 0) WHERE id = ?2")
            .bind(delta)
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Store a freshly computed load score inside an open transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_load_score_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        load_score: u8,
    ) -> Result<()> {
        sqlx::query("UPDATE worker SET load_score = ?1 WHERE id = ?2")
            .bind(i64::from(load_score))
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Online workers whose last heartbeat predates `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn stale_online(&self, cutoff: DateTime<Utc>) -> Result<Vec<Worker>> {
        let rows: Vec<WorkerRow> = sqlx::query_as(
            "SELECT * FROM worker WHERE status = 'online'
             AND (last_heartbeat IS NULL OR last_heartbeat < ?1)",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(WorkerRow::into_worker).collect()
    }

    /// Sum of `used_ram` and `total_ram` over online workers.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn fleet_ram(&self) -> Result<(i64, i64)> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(used_ram), 0), COALESCE(SUM(total_ram), 0)
             FROM worker WHERE status = 'online'",
        )
        .fetch_one(self.db.as_ref())
        .await?;
        Ok(row)
    }
}
