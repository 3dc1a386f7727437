//! Operational-record repositories: scaling events, worker analytics
//! samples, and worker control commands.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::log::{
    ControlAction, ControlStatus, ScalingEvent, ScalingTrigger, WorkerAnalytics, WorkerControl,
};
use crate::{AppError, Result};

use super::db::Database;
use super::parse_ts;

/// Repository wrapper around `SQLite` for operational records.
#[derive(Clone)]
pub struct OpsRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct ScalingRow {
    id: String,
    event_type: String,
    trigger_kind: String,
    queued: i64,
    utilisation_pct: f64,
    details: Option<String>,
    created_at: String,
}

impl ScalingRow {
    fn into_event(self) -> Result<ScalingEvent> {
        let trigger = ScalingTrigger::parse(&self.trigger_kind)
            .ok_or_else(|| AppError::Db(format!("invalid scaling trigger: {}", self.trigger_kind)))?;
        Ok(ScalingEvent {
            created_at: parse_ts(&self.created_at, "created_at")?,
            id: self.id,
            event_type: self.event_type,
            trigger,
            queued: self.queued,
            utilisation_pct: self.utilisation_pct,
            details: self.details,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ControlRow {
    id: String,
    worker_id: String,
    session_id: String,
    action: String,
    status: String,
    created_at: String,
}

impl ControlRow {
    fn into_control(self) -> Result<WorkerControl> {
        let action = ControlAction::parse(&self.action)
            .ok_or_else(|| AppError::Db(format!("invalid control action: {}", self.action)))?;
        let status = ControlStatus::parse(&self.status)
            .ok_or_else(|| AppError::Db(format!("invalid control status: {}", self.status)))?;
        Ok(WorkerControl {
            created_at: parse_ts(&self.created_at, "created_at")?,
            id: self.id,
            worker_id: self.worker_id,
            session_id: self.session_id,
            action,
            status,
        })
    }
}

impl OpsRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append a scaling event.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn insert_scaling_event(&self, event: &ScalingEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO scaling_event (id, event_type, trigger_kind, queued, utilisation_pct,
             details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(event.trigger.as_str())
        .bind(event.queued)
        .bind(event.utilisation_pct)
        .bind(&event.details)
        .bind(event.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Most recent scaling event, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn latest_scaling_event(&self) -> Result<Option<ScalingEvent>> {
        let row: Option<ScalingRow> =
            sqlx::query_as("SELECT * FROM scaling_event ORDER BY created_at DESC LIMIT 1")
                .fetch_optional(self.db.as_ref())
                .await?;
        row.map(ScalingRow::into_event).transpose()
    }

    /// Append a worker analytics sample.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn insert_analytics(&self, sample: &WorkerAnalytics) -> Result<()> {
        sqlx::query(
            "INSERT INTO worker_analytics (id, worker_id, used_ram, cpu_percent, active_sessions,
             load_score, ping_ms, sampled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&sample.id)
        .bind(&sample.worker_id)
        .bind(sample.used_ram)
        .bind(sample.cpu_percent)
        .bind(sample.active_sessions)
        .bind(i64::from(sample.load_score))
        .bind(sample.ping_ms)
        .bind(sample.sampled_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Queue a control command for a worker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn insert_control(&self, control: &WorkerControl) -> Result<()> {
        sqlx::query(
            "INSERT INTO worker_control (id, worker_id, session_id, action, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&control.id)
        .bind(&control.worker_id)
        .bind(&control.session_id)
        .bind(control.action.as_str())
        .bind(control.status.as_str())
        .bind(control.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Pending commands for a worker, marking them delivered in one step.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn claim_pending_controls(&self, worker_id: &str) -> Result<Vec<WorkerControl>> {
        let rows: Vec<ControlRow> = sqlx::query_as(
            "UPDATE worker_control SET status = 'delivered'
             WHERE worker_id = ?1 AND status = 'pending'
             RETURNING *",
        )
        .bind(worker_id)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(ControlRow::into_control).collect()
    }

    /// Worker confirmation that a command ran.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the command does not exist,
    /// `AppError::Db` on other failures.
    pub async fn acknowledge_control(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE worker_control SET status = 'acknowledged' WHERE id = ?1",
        )
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("control {id} not found")));
        }
        Ok(())
    }

    /// Purge analytics samples and acknowledged controls older than
    /// `cutoff`. Returns total rows removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a delete fails.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let stamp = cutoff.to_rfc3339();
        let analytics = sqlx::query("DELETE FROM worker_analytics WHERE sampled_at < ?1")
            .bind(&stamp)
            .execute(self.db.as_ref())
            .await?;
        let controls = sqlx::query(
            "DELETE FROM worker_control WHERE status = 'acknowledged' AND created_at < ?1",
        )
        .bind(&stamp)
        .execute(self.db.as_ref())
        .await?;
        Ok(analytics.rows_affected() + controls.rows_affected())
    }
}
